use axum::response::Response;
use bytes::Bytes;
use http_body_util::BodyExt;

const BOUNDARY: &str = "gateway-test-boundary";

/// Hand-built `multipart/form-data` body
#[derive(Default)]
pub struct MultipartBody {
    buffer: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file part, with a `filename` attribute when `file_name` is set
    pub fn file(
        mut self,
        field: &str,
        file_name: Option<&str>,
        content_type: &str,
        data: &[u8],
    ) -> Self {
        let disposition = match file_name {
            Some(name) => format!("form-data; name=\"{field}\"; filename=\"{name}\""),
            None => format!("form-data; name=\"{field}\""),
        };
        self.buffer.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.buffer.extend_from_slice(data);
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Adds a plain text part
    pub fn text(mut self, field: &str, value: &str) -> Self {
        self.buffer.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.buffer
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.buffer
    }
}

pub async fn parse_response_body(response: Response) -> serde_json::Value {
    let body = response_bytes(response).await;
    serde_json::from_slice(&body).expect("Failed to parse response body")
}

pub async fn response_bytes(response: Response) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("Failed to read response body")
        .to_bytes()
}

/// `YYYYMMDD` for the current UTC day
pub fn today_prefix() -> String {
    chrono::Utc::now().format("%Y%m%d").to_string()
}

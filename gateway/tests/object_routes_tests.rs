mod common;

use std::time::Duration;

use axum::http::{header, StatusCode};
use common::*;
use serde_json::json;

// Upload

#[tokio::test]
async fn test_upload_object_happy_path() {
    let setup = TestSetup::new();

    let body = MultipartBody::new().file("file", Some("cat.png"), "image/png", b"meow");
    let response = setup
        .send_multipart_request("/v1/buckets/photos/objects", body)
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    let expected_key = format!("{}/cat.png", today_prefix());
    assert_eq!(body["bucket"], "photos");
    assert_eq!(body["objectKey"], expected_key.as_str());
    assert_eq!(
        body["url"],
        format!("{TEST_ENDPOINT}/photos/{expected_key}").as_str()
    );
    assert_eq!(body["expirySecs"], 3600);
    assert!(body["expiresAt"].is_string());

    let expiry_url = body["expiryUrl"].as_str().unwrap();
    assert!(expiry_url.contains(&expected_key));
    assert!(expiry_url.contains("X-Amz-Method=GET"));
    assert!(expiry_url.contains("X-Amz-Expires=3600"));

    let stored = setup
        .object_store
        .object_bytes("photos", &expected_key)
        .expect("Object was not stored");
    assert_eq!(stored.as_ref(), b"meow");
}

#[tokio::test]
async fn test_upload_creates_missing_bucket_once() {
    let setup = TestSetup::new();

    for name in ["a.txt", "b.txt"] {
        let body = MultipartBody::new().file("file", Some(name), "text/plain", b"x");
        let response = setup
            .send_multipart_request("/v1/buckets/fresh-bucket/objects", body)
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(setup.object_store.create_bucket_calls(), 1);
}

#[tokio::test]
async fn test_upload_file_name_field_overrides_part_name() {
    let setup = TestSetup::new();

    let body = MultipartBody::new()
        .text("fileName", "avatar.jpg")
        .file("file", Some("IMG_0001.JPG"), "image/jpeg", b"jpeg");
    let response = setup
        .send_multipart_request("/v1/buckets/photos/objects", body)
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert_eq!(
        body["objectKey"],
        format!("{}/avatar.jpg", today_prefix()).as_str()
    );
    assert!(body.get("object_key").is_none());
}

#[tokio::test]
async fn test_upload_blank_name_uses_default() {
    let setup = TestSetup::new();

    let body = MultipartBody::new()
        .text("fileName", "   ")
        .file("file", None, "image/jpeg", b"jpeg");
    let response = setup
        .send_multipart_request("/v1/buckets/photos/objects", body)
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert_eq!(
        body["objectKey"],
        format!("{}/99.jpg", today_prefix()).as_str()
    );
}

#[tokio::test]
async fn test_upload_custom_signed_url_ttl() {
    let setup = TestSetup::with_ttl(Duration::from_secs(120));

    let body = MultipartBody::new().file("file", Some("cat.png"), "image/png", b"meow");
    let response = setup
        .send_multipart_request("/v1/buckets/photos/objects", body)
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert_eq!(body["expirySecs"], 120);
    assert!(body["expiryUrl"]
        .as_str()
        .unwrap()
        .contains("X-Amz-Expires=120"));
}

#[tokio::test]
async fn test_upload_missing_file_part() {
    let setup = TestSetup::new();

    let body = MultipartBody::new().text("fileName", "cat.png");
    let response = setup
        .send_multipart_request("/v1/buckets/photos/objects", body)
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = parse_response_body(response).await;
    assert_eq!(body["allowRetry"], false);
    assert_eq!(body["error"]["code"], "missing_file");
}

#[tokio::test]
async fn test_upload_invalid_bucket_name() {
    let setup = TestSetup::new();

    for bucket in ["ab", "Photos", "my_bucket"] {
        let body = MultipartBody::new().file("file", Some("cat.png"), "image/png", b"meow");
        let response = setup
            .send_multipart_request(&format!("/v1/buckets/{bucket}/objects"), body)
            .await
            .expect("Failed to send request");

        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "Bucket {bucket} should be rejected"
        );
    }
}

#[tokio::test]
async fn test_upload_overlong_file_name() {
    let setup = TestSetup::new();

    let long_name = "a".repeat(1100);
    let body = MultipartBody::new()
        .text("fileName", &long_name)
        .file("file", Some("cat.png"), "image/png", b"meow");
    let response = setup
        .send_multipart_request("/v1/buckets/photos/objects", body)
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = parse_response_body(response).await;
    assert_eq!(body["allowRetry"], false);
    assert_eq!(body["error"]["code"], "invalid_input");
}

#[tokio::test]
async fn test_upload_backend_unavailable() {
    let setup = TestSetup::new();
    setup.object_store.set_unavailable(true);

    let body = MultipartBody::new().file("file", Some("cat.png"), "image/png", b"meow");
    let response = setup
        .send_multipart_request("/v1/buckets/photos/objects", body)
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = parse_response_body(response).await;
    assert_eq!(body["allowRetry"], true);
    assert_eq!(body["error"]["code"], "backend_unavailable");
}

#[tokio::test]
async fn test_upload_signing_failure() {
    let setup = TestSetup::new();
    setup.object_store.set_signing_broken(true);

    let body = MultipartBody::new().file("file", Some("cat.png"), "image/png", b"meow");
    let response = setup
        .send_multipart_request("/v1/buckets/photos/objects", body)
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = parse_response_body(response).await;
    assert_eq!(body["error"]["code"], "signing_failed");
}

// Listing

#[tokio::test]
async fn test_list_buckets() {
    let setup = TestSetup::new();
    setup.seed("alpha", &[]).await;
    setup.seed("beta", &[]).await;

    let response = setup
        .send_get_request("/v1/buckets")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    let names: Vec<&str> = body["buckets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|bucket| bucket["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["alpha", "beta"]);
    assert!(body["buckets"][0]["creationDate"].is_string());
}

#[tokio::test]
async fn test_list_objects_empty_bucket() {
    let setup = TestSetup::new();
    setup.seed("empty-bucket", &[]).await;

    let response = setup
        .send_get_request("/v1/buckets/empty-bucket/objects")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert_eq!(body["objects"], json!([]));
}

#[tokio::test]
async fn test_list_objects_missing_bucket() {
    let setup = TestSetup::new();

    let response = setup
        .send_get_request("/v1/buckets/nowhere/objects")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = parse_response_body(response).await;
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_list_objects_recursive_by_default() {
    let setup = TestSetup::new();
    setup
        .seed("photos", &["20240501/a.png", "20240501/b.png", "top.txt"])
        .await;

    let response = setup
        .send_get_request("/v1/buckets/photos/objects")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    let objects = body["objects"].as_array().unwrap();
    assert_eq!(objects.len(), 3);
    assert!(objects.iter().all(|object| object["isDir"] == false));
    assert_eq!(objects[0]["key"], "20240501/a.png");
    assert_eq!(objects[0]["size"], "20240501/a.png".len());
}

#[tokio::test]
async fn test_list_objects_non_recursive_with_prefix_and_limit() {
    let setup = TestSetup::new();
    setup
        .seed(
            "photos",
            &["20240501/a.png", "20240502/b.png", "20240502/c.png", "top.txt"],
        )
        .await;

    let response = setup
        .send_get_request("/v1/buckets/photos/objects?recursive=false")
        .await
        .expect("Failed to send request");
    let body = parse_response_body(response).await;
    let keys: Vec<&str> = body["objects"]
        .as_array()
        .unwrap()
        .iter()
        .map(|object| object["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, ["20240501/", "20240502/", "top.txt"]);
    assert_eq!(body["objects"][0]["isDir"], true);

    let response = setup
        .send_get_request("/v1/buckets/photos/objects?prefix=20240502/&limit=1")
        .await
        .expect("Failed to send request");
    let body = parse_response_body(response).await;
    assert_eq!(body["objects"].as_array().unwrap().len(), 1);
    assert_eq!(body["objects"][0]["key"], "20240502/b.png");
}

// Single object operations

#[tokio::test]
async fn test_download_object() {
    let setup = TestSetup::new();
    setup.seed("photos", &["20240501/notes.txt"]).await;

    let response = setup
        .send_get_request("/v1/buckets/photos/downloads/20240501/notes.txt")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"notes.txt\""
    );

    let bytes = response_bytes(response).await;
    assert_eq!(bytes.as_ref(), b"20240501/notes.txt");
}

#[tokio::test]
async fn test_download_missing_object() {
    let setup = TestSetup::new();
    setup.seed("photos", &[]).await;

    let response = setup
        .send_get_request("/v1/buckets/photos/downloads/20240501/ghost.png")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stat_object() {
    let setup = TestSetup::new();
    setup.seed("photos", &["20240501/notes.txt"]).await;

    let response = setup
        .send_get_request("/v1/buckets/photos/metadata/20240501/notes.txt")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert_eq!(body["bucket"], "photos");
    assert_eq!(body["key"], "20240501/notes.txt");
    assert_eq!(body["size"], "20240501/notes.txt".len());
    assert_eq!(body["contentType"], "text/plain");
    assert!(body["etag"].is_string());
    assert!(body["lastModified"].is_string());
}

#[tokio::test]
async fn test_stat_missing_object() {
    let setup = TestSetup::new();
    setup.seed("photos", &[]).await;

    let response = setup
        .send_get_request("/v1/buckets/photos/metadata/20240501/ghost.png")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = parse_response_body(response).await;
    assert_eq!(body["allowRetry"], false);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_stat_rejects_key_over_byte_limit() {
    let setup = TestSetup::new();
    setup.seed("photos", &[]).await;

    // 600 characters but 1200 bytes once UTF-8 encoded, sent percent-encoded
    let key = "%C3%A9".repeat(600);
    let response = setup
        .send_get_request(&format!("/v1/buckets/photos/metadata/{key}"))
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_object() {
    let setup = TestSetup::new();
    setup.seed("photos", &["20240501/a.png"]).await;

    let response = setup
        .send_delete_request("/v1/buckets/photos/objects/20240501/a.png")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(setup
        .object_store
        .object_bytes("photos", "20240501/a.png")
        .is_none());

    // Deleting again is still a success
    let response = setup
        .send_delete_request("/v1/buckets/photos/objects/20240501/a.png")
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_issue_access_urls() {
    let setup = TestSetup::new();
    setup.seed("photos", &["20240501/a.png"]).await;

    let response = setup
        .send_get_request("/v1/buckets/photos/access-urls/20240501/a.png")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert_eq!(
        body["url"],
        format!("{TEST_ENDPOINT}/photos/20240501/a.png").as_str()
    );
    assert_eq!(body["expirySecs"], 3600);
    assert!(body["expiryUrl"]
        .as_str()
        .unwrap()
        .starts_with("memory://photos/20240501/a.png?"));
}

#[tokio::test]
async fn test_issue_access_urls_missing_object() {
    let setup = TestSetup::new();
    setup.seed("photos", &[]).await;

    let response = setup
        .send_get_request("/v1/buckets/photos/access-urls/20240501/ghost.png")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// Batch delete

#[tokio::test]
async fn test_batch_delete_reports_partial_failure() {
    let setup = TestSetup::new();
    setup.seed("photos", &["a.png", "b.png", "c.png"]).await;
    setup.object_store.refuse_delete("b.png");

    let response = setup
        .send_post_request(
            "/v1/buckets/photos/batch-delete",
            json!({ "objectNames": ["a.png", "b.png", "c.png"] }),
        )
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert_eq!(body["deleted"], json!(["a.png", "c.png"]));
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    assert_eq!(body["errors"][0]["key"], "b.png");
    assert_eq!(body["errors"][0]["code"], "AccessDenied");
    assert!(body["errors"][0]["message"].is_string());

    assert!(setup.object_store.object_bytes("photos", "b.png").is_some());
    assert!(setup.object_store.object_bytes("photos", "a.png").is_none());
}

#[tokio::test]
async fn test_batch_delete_rejects_empty_list() {
    let setup = TestSetup::new();
    setup.seed("photos", &[]).await;

    let response = setup
        .send_post_request(
            "/v1/buckets/photos/batch-delete",
            json!({ "objectNames": [] }),
        )
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_delete_missing_bucket() {
    let setup = TestSetup::new();

    let response = setup
        .send_post_request(
            "/v1/buckets/nowhere/batch-delete",
            json!({ "objectNames": ["a.png"] }),
        )
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// Service routes

#[tokio::test]
async fn test_health() {
    let setup = TestSetup::new();

    let response = setup
        .send_get_request("/health")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["semver"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_openapi_schema_lists_object_routes() {
    let setup = TestSetup::new();
    assert!(setup.environment.show_api_docs());

    let response = setup
        .send_get_request("/openapi.json")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_response_body(response).await;
    assert!(body["paths"]["/v1/buckets/{bucket}/objects"].is_object());
    assert!(body["paths"]["/v1/buckets/{bucket}/batch-delete"].is_object());
}

//! Texture host client against a local server
#![cfg(feature = "fetch")]

use mcskin_render::{Error, TextureHost};
use std::time::Duration;
use tiny_http::{Response, Server};

const KNOWN_HASH: &str = "0123456789abcdef0123456789abcdef";

fn start_test_server() -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let resp = if request.url() == format!("/texture/{}", KNOWN_HASH) {
                Response::from_data(b"\x89PNG skin bytes".to_vec())
                    .with_header("Content-Type: image/png".parse::<tiny_http::Header>().unwrap())
            } else if request.url().starts_with("/texture/") {
                Response::from_data(Vec::new()).with_status_code(404)
            } else {
                Response::from_data(Vec::new()).with_status_code(500)
            };
            let _ = request.respond(resp);
        }
    });
    format!("http://{}/texture/", addr)
}

#[tokio::test]
async fn fetches_known_skin() {
    let host = TextureHost::with_base_url(start_test_server(), Duration::from_secs(5)).unwrap();
    let bytes = host.fetch_skin(KNOWN_HASH).await.unwrap();
    assert_eq!(bytes, b"\x89PNG skin bytes");
}

#[tokio::test]
async fn uppercase_hash_is_normalized() {
    let host = TextureHost::with_base_url(start_test_server(), Duration::from_secs(5)).unwrap();
    let bytes = host.fetch_skin(&KNOWN_HASH.to_uppercase()).await.unwrap();
    assert_eq!(bytes, b"\x89PNG skin bytes");
}

#[tokio::test]
async fn unknown_skin_is_not_found() {
    let host = TextureHost::with_base_url(start_test_server(), Duration::from_secs(5)).unwrap();
    let err = host.fetch_skin(&"f".repeat(40)).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn server_errors_surface_as_texture_host_errors() {
    let base = start_test_server().replace("/texture/", "/broken/");
    let host = TextureHost::with_base_url(base, Duration::from_secs(5)).unwrap();
    let err = host.fetch_skin(KNOWN_HASH).await.unwrap_err();
    assert!(matches!(err, Error::TextureHost(_)));
}

#[tokio::test]
async fn malformed_hash_is_rejected_locally() {
    let host = TextureHost::with_base_url("http://127.0.0.1:1/texture/", Duration::from_secs(1)).unwrap();
    let err = host.fetch_skin("not-a-hash").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

//! HTTP handlers for static asset serving.

use axum::{
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument};

use crate::static_assets::{Assets, INDEX};

/// Serve an embedded asset, with `index.html` for directory paths
#[instrument]
pub async fn serve_embedded_asset(uri: Uri) -> Response {
    let mut path = uri.path().trim_start_matches('/');

    if path.is_empty() || path.ends_with('/') {
        path = INDEX;
    }

    match Assets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [
                    (header::CONTENT_TYPE, mime.as_ref().to_string()),
                    (header::CACHE_CONTROL, "no-cache".to_string()),
                ],
                content.data.into_owned(),
            )
                .into_response()
        }
        None => {
            debug!("No embedded asset for {}", uri.path());
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum_test::TestServer;

    fn create_test_router() -> Router {
        Router::new().fallback(serve_embedded_asset)
    }

    #[tokio::test]
    async fn test_serve_root_returns_index_html() {
        let server = TestServer::new(create_test_router()).unwrap();

        let response = server.get("/").await;

        response.assert_status_ok();
        assert_eq!(
            response.headers().get("content-type").map(|v| v.to_str().unwrap()),
            Some("text/html")
        );
        assert_eq!(
            response.headers().get("cache-control").map(|v| v.to_str().unwrap()),
            Some("no-cache")
        );
        assert!(response.text().contains("<!doctype html>"));
    }

    #[tokio::test]
    async fn test_index_posts_to_upload_endpoint() {
        let server = TestServer::new(create_test_router()).unwrap();

        let text = server.get("/index.html").await.text();

        assert!(text.contains("/api/upload"));
        assert!(text.contains("https://arweave.net/"));
        assert!(text.contains("https://viewblock.io/arweave/tx/"));
    }

    #[tokio::test]
    async fn test_index_keeps_pending_status_on_file_change() {
        let server = TestServer::new(create_test_router()).unwrap();

        let text = server.get("/").await.text();

        assert!(text.contains(r#"if (!inFlight) render("", null);"#));
        assert!(!text.contains("\n        render(\"\", null);"));
    }

    #[tokio::test]
    async fn test_unknown_asset_is_not_found() {
        let server = TestServer::new(create_test_router()).unwrap();

        server.get("/missing.js").await.assert_status_not_found();
    }
}

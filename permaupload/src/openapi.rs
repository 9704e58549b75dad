//! OpenAPI documentation for the upload API, served at `/api/docs`.

use utoipa::OpenApi;

use crate::{api, payload};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "permaupload",
        description = "Forward JSON documents and files to permanent decentralized storage."
    ),
    servers(
        (url = "/api", description = "Upload API")
    ),
    paths(api::handlers::uploads::upload),
    components(schemas(
        api::models::uploads::UploadResponse,
        api::models::uploads::UploadErrorResponse,
        payload::Tag,
    )),
    tags(
        (name = "uploads", description = "Upload content to the configured storage provider")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_upload_path() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/upload"));

        let schemas = doc.components.expect("components").schemas;
        assert!(schemas.contains_key("UploadResponse"));
        assert!(schemas.contains_key("UploadErrorResponse"));
    }
}

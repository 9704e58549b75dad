//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Uploads** (`POST /api/upload`): forward a JSON document or a multipart file to the
//!   configured storage provider
//! - **Static assets** (`/*`): the embedded browser client
//!
//! API documentation is available at `/api/docs` when the server is running.

pub mod handlers;
pub mod models;

//! HTTP request handlers.
//!
//! - [`uploads`]: `POST /api/upload`, forwarding payloads to the storage provider
//! - [`static_assets`]: the embedded browser client

pub mod static_assets;
pub mod uploads;

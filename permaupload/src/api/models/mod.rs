//! API request and response data models.
//!
//! These structures define the public contract of the upload endpoint and are annotated with
//! `utoipa` for the generated OpenAPI document.

pub mod uploads;

use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::Value;
use utoipa::ToSchema;

use crate::payload::FileMetadata;
use crate::storage_providers::UploadReceipt;

/// Successful upload response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Always `true`
    pub success: bool,
    /// Identifier assigned by the storage provider
    pub id: String,
    pub data_caches: Vec<String>,
    pub fast_finality_indexes: Vec<String>,
    /// Price quoted before the upload, in winc
    #[schema(value_type = u64)]
    pub cost: u128,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl UploadResponse {
    /// Combine the provider receipt with the cost quoted before the upload
    pub fn new(receipt: UploadReceipt, cost: u128, file: Option<FileMetadata>) -> Self {
        let (file_name, file_type, file_size) = match file {
            Some(meta) => (Some(meta.file_name), Some(meta.file_type), Some(meta.file_size)),
            None => (None, None, None),
        };

        Self {
            success: true,
            id: receipt.id,
            data_caches: receipt.data_caches,
            fast_finality_indexes: receipt.fast_finality_indexes,
            cost,
            file_name,
            file_type,
            file_size,
        }
    }
}

/// Error response returned for every failed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UploadErrorResponse {
    /// Always `false`
    pub success: bool,
    pub error: String,
}

impl UploadErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// Either outcome of `POST /api/upload`, as seen by a client, selected by the `success` flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success(UploadResponse),
    Failure(UploadErrorResponse),
}

impl<'de> Deserialize<'de> for UploadOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let outcome = match value.get("success").and_then(Value::as_bool) {
            Some(true) => serde_json::from_value(value).map(UploadOutcome::Success),
            Some(false) => serde_json::from_value(value).map(UploadOutcome::Failure),
            None => return Err(D::Error::custom("missing boolean field `success`")),
        };
        outcome.map_err(D::Error::custom)
    }
}

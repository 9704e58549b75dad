//! Storage provider abstraction layer
//!
//! This module defines the `StorageProvider` trait which abstracts the decentralized storage
//! service uploads are forwarded to. The endpoint only ever needs three capabilities: a price
//! quote for a byte length, an upload of a re-readable stream, and reading content back.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::payload::{StreamFactory, Tag};
use crate::wallet::{Wallet, WalletError};

pub mod dummy;
pub mod turbo;

/// Create a storage provider from configuration
///
/// This is the single point where we convert config into provider instances. Providers that
/// sign uploads resolve their wallet here, so a missing credential fails startup.
pub fn create_provider(config: ProviderConfig) -> std::result::Result<Arc<dyn StorageProvider>, ProviderSetupError> {
    match config {
        ProviderConfig::Turbo(turbo_config) => {
            let wallet = Wallet::resolve(&turbo_config.wallet)?;
            Ok(Arc::new(turbo::TurboProvider::new(turbo_config, wallet)?))
        }
        ProviderConfig::Dummy(dummy_config) => Ok(Arc::new(dummy::DummyProvider::from(dummy_config))),
    }
}

/// Result type for storage provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors raised by a provider during a cost query, upload or read
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Storage provider API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Storage provider request failed: {0}")]
    Transport(String),

    #[error("Unexpected storage provider response: {0}")]
    InvalidResponse(String),

    #[error("Stream yielded {actual} bytes but {expected} were declared")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("Failed to read upload stream: {0}")]
    Stream(#[from] std::io::Error),

    #[error("Failed to build data item: {0}")]
    DataItem(#[from] crate::data_item::DataItemError),

    #[error("Content {0} not found")]
    NotFound(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

/// Errors raised while constructing a provider at startup
#[derive(Debug, thiserror::Error)]
pub enum ProviderSetupError {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// A price quote for one byte length, in winc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostQuote {
    pub winc: u128,
}

/// What the provider reports after accepting an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub id: String,
    #[serde(default)]
    pub data_caches: Vec<String>,
    #[serde(default)]
    pub fast_finality_indexes: Vec<String>,
}

/// Abstract storage provider interface
///
/// Implementors forward content to a storage network (Turbo, in-memory, ...).
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Quote the cost of storing each of `byte_lengths`
    ///
    /// Returns one quote per requested length, in the same order.
    async fn estimate_cost(&self, byte_lengths: &[u64]) -> Result<Vec<CostQuote>>;

    /// Upload the content produced by `stream`
    ///
    /// `size` is the exact number of bytes `stream` yields; implementations may open the
    /// stream more than once.
    async fn upload(&self, stream: StreamFactory, size: u64, tags: Vec<Tag>) -> Result<UploadReceipt>;

    /// Read previously uploaded content back by id
    async fn fetch(&self, id: &str) -> Result<Bytes>;
}

/// Drain `stream` and check it produced exactly `size` bytes.
pub(crate) async fn read_exact(stream: &StreamFactory, size: u64) -> Result<Bytes> {
    let bytes = stream.read_all().await?;
    let actual = bytes.len() as u64;
    if actual != size {
        return Err(ProviderError::LengthMismatch { expected: size, actual });
    }
    Ok(bytes)
}

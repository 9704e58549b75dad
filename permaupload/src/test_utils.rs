//! Test utilities shared by handler and client tests.

use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use axum_test::TestServer;
use bytes::Bytes;

use crate::config::{Config, DummyConfig, ProviderConfig};
use crate::payload::{StreamFactory, Tag};
use crate::storage_providers::{CostQuote, ProviderError, Result, StorageProvider, UploadReceipt};

static CRYPTO_PROVIDER: Once = Once::new();

/// 4096-bit Arweave RSA JWK used by signing tests
pub const ARWEAVE_TEST_WALLET: &str = include_str!("../testdata/arweave_wallet.json");

/// Address of [`ARWEAVE_TEST_WALLET`]: base64url SHA-256 of its modulus
pub const ARWEAVE_TEST_ADDRESS: &str = "TjcYpl5Xr8k5NKLHxbeq9Sas7Yg6bLsHbnet1AqN1hY";

/// Install the rustls crypto provider once per test binary, as `main` does at startup.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

pub fn create_test_config() -> Config {
    Config {
        enable_metrics: false,
        provider: ProviderConfig::Dummy(DummyConfig::default()),
        ..Default::default()
    }
}

/// Build a test server for the full router around `provider`.
pub fn create_test_server(provider: Arc<dyn StorageProvider>) -> TestServer {
    create_test_server_with_config(create_test_config(), provider)
}

pub fn create_test_server_with_config(config: Config, provider: Arc<dyn StorageProvider>) -> TestServer {
    let app = crate::Application::with_provider(config, provider).expect("Failed to create application");
    app.into_test_server()
}

/// A call observed by [`MockProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    EstimateCost(Vec<u64>),
    /// `drained` is the number of bytes the stream actually yielded
    Upload { size: u64, drained: u64, tags: Vec<Tag> },
}

/// Scripted provider that records every call in order.
pub struct MockProvider {
    cost: u128,
    quote_count: Option<usize>,
    receipt: UploadReceipt,
    cost_error: Option<String>,
    upload_error: Option<String>,
    uploads: Mutex<Vec<Bytes>>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            cost: 0,
            quote_count: None,
            receipt: UploadReceipt {
                id: "mock-id".to_string(),
                data_caches: Vec::new(),
                fast_finality_indexes: Vec::new(),
            },
            cost_error: None,
            upload_error: None,
            uploads: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_cost(mut self, cost: u128) -> Self {
        self.cost = cost;
        self
    }

    /// Return this many quotes regardless of how many lengths were requested
    pub fn with_quote_count(mut self, count: usize) -> Self {
        self.quote_count = Some(count);
        self
    }

    pub fn with_receipt(mut self, id: &str, data_caches: &[&str], fast_finality_indexes: &[&str]) -> Self {
        self.receipt = UploadReceipt {
            id: id.to_string(),
            data_caches: data_caches.iter().map(|s| s.to_string()).collect(),
            fast_finality_indexes: fast_finality_indexes.iter().map(|s| s.to_string()).collect(),
        };
        self
    }

    pub fn fail_cost(mut self, message: &str) -> Self {
        self.cost_error = Some(message.to_string());
        self
    }

    pub fn fail_upload(mut self, message: &str) -> Self {
        self.upload_error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ProviderCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl StorageProvider for MockProvider {
    async fn estimate_cost(&self, byte_lengths: &[u64]) -> Result<Vec<CostQuote>> {
        self.record(ProviderCall::EstimateCost(byte_lengths.to_vec()));

        if let Some(message) = &self.cost_error {
            return Err(ProviderError::Transport(message.clone()));
        }

        let count = self.quote_count.unwrap_or(byte_lengths.len());
        Ok(vec![CostQuote { winc: self.cost }; count])
    }

    async fn upload(&self, stream: StreamFactory, size: u64, tags: Vec<Tag>) -> Result<UploadReceipt> {
        // Drain twice to check the factory hands out independent readers
        let first = stream.read_all().await?;
        let second = stream.read_all().await?;
        assert_eq!(first, second, "stream factory must be re-readable");

        self.record(ProviderCall::Upload {
            size,
            drained: first.len() as u64,
            tags,
        });

        if let Some(message) = &self.upload_error {
            return Err(ProviderError::Api {
                status: 402,
                body: message.clone(),
            });
        }

        self.uploads.lock().unwrap().push(first);
        Ok(self.receipt.clone())
    }

    async fn fetch(&self, id: &str) -> Result<Bytes> {
        if id != self.receipt.id {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        self.uploads
            .lock()
            .unwrap()
            .last()
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }
}

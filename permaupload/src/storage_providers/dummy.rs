//! Dummy storage provider implementation
//!
//! Keeps uploaded content in memory and prices it at a fixed rate per byte. Content ids are the
//! base64url SHA-256 of the bytes, so identical uploads share an id. At most `max_items` uploads
//! are kept; the oldest is evicted first. Useful for local development and testing without a
//! funded wallet.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::{
    config::DummyConfig,
    payload::{StreamFactory, Tag},
    storage_providers::{CostQuote, ProviderError, Result, StorageProvider, UploadReceipt, read_exact},
};

/// Cache/finality marker reported for every upload
const DUMMY_NODE: &str = "dummy";

/// In-memory provider
pub struct DummyProvider {
    winc_per_byte: u64,
    max_items: usize,
    store: DashMap<String, StoredItem>,
    /// Ids in insertion order, for eviction
    order: Mutex<VecDeque<String>>,
}

struct StoredItem {
    data: Bytes,
    tags: Vec<Tag>,
}

impl DummyProvider {
    pub fn new(winc_per_byte: u64) -> Self {
        Self::with_max_items(winc_per_byte, DummyConfig::default().max_items)
    }

    pub fn with_max_items(winc_per_byte: u64, max_items: usize) -> Self {
        Self {
            winc_per_byte,
            max_items: max_items.max(1),
            store: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Tags recorded with an upload
    pub fn tags(&self, id: &str) -> Option<Vec<Tag>> {
        self.store.get(id).map(|item| item.tags.clone())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl From<DummyConfig> for DummyProvider {
    fn from(config: DummyConfig) -> Self {
        Self::with_max_items(config.winc_per_byte, config.max_items)
    }
}

#[async_trait]
impl StorageProvider for DummyProvider {
    async fn estimate_cost(&self, byte_lengths: &[u64]) -> Result<Vec<CostQuote>> {
        Ok(byte_lengths
            .iter()
            .map(|bytes| CostQuote {
                winc: u128::from(*bytes) * u128::from(self.winc_per_byte),
            })
            .collect())
    }

    async fn upload(&self, stream: StreamFactory, size: u64, tags: Vec<Tag>) -> Result<UploadReceipt> {
        let data = read_exact(&stream, size).await?;
        let id = URL_SAFE_NO_PAD.encode(Sha256::digest(&data));

        tracing::info!("Dummy provider stored {} bytes as {}", size, id);
        if self.store.insert(id.clone(), StoredItem { data, tags }).is_none() {
            let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
            order.push_back(id.clone());
            while order.len() > self.max_items {
                if let Some(oldest) = order.pop_front() {
                    tracing::debug!("Dummy provider evicted {}", oldest);
                    self.store.remove(&oldest);
                }
            }
        }

        Ok(UploadReceipt {
            id,
            data_caches: vec![DUMMY_NODE.to_string()],
            fast_finality_indexes: vec![DUMMY_NODE.to_string()],
        })
    }

    async fn fetch(&self, id: &str) -> Result<Bytes> {
        self.store
            .get(id)
            .map(|item| item.data.clone())
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }
}

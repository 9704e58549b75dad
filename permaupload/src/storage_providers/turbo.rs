//! ArDrive Turbo provider implementation
//!
//! Turbo quotes prices from its payment service and accepts signed ANS-104 data items on its
//! upload service. Content becomes readable from an Arweave gateway once cached.
//!
//! - price: `GET {payment_url}/v1/price/bytes/{n}` → `{"winc": "<integer>"}`
//! - upload: `POST {upload_url}/v1/tx/{token}` with the data item as the body. The token is
//!   `arweave` for RSA wallets and `solana` for Ed25519 ones unless configured.
//! - read: `GET {gateway_url}/{id}`

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::{
    config::TurboConfig,
    data_item::DataItem,
    payload::{StreamFactory, Tag},
    storage_providers::{CostQuote, ProviderError, Result, StorageProvider, UploadReceipt, read_exact},
    wallet::Wallet,
};

#[serde_as]
#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    winc: u128,
}

/// Turbo upload/payment service client holding the process-wide signing wallet
pub struct TurboProvider {
    client: Client,
    upload_url: Url,
    payment_url: Url,
    gateway_url: Url,
    token: String,
    wallet: Wallet,
}

impl TurboProvider {
    pub fn new(config: TurboConfig, wallet: Wallet) -> std::result::Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            upload_url: ensure_slash(&config.upload_url),
            payment_url: ensure_slash(&config.payment_url),
            gateway_url: ensure_slash(&config.gateway_url),
            token: config.token.unwrap_or_else(|| wallet.default_token().to_string()),
            wallet,
        })
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }
}

/// Makes sure a url has a trailing slash, so that `join` appends instead of replacing the last
/// path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", url.path());
        new_url.set_path(&path);
        new_url
    }
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| ProviderError::Transport(format!("Failed to construct URL from {base} and {path}: {e}")))
}

/// Turn a non-2xx response into [`ProviderError::Api`], keeping the body text verbatim.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl StorageProvider for TurboProvider {
    #[instrument(skip(self))]
    async fn estimate_cost(&self, byte_lengths: &[u64]) -> Result<Vec<CostQuote>> {
        let mut quotes = Vec::with_capacity(byte_lengths.len());

        for bytes in byte_lengths {
            let url = join(&self.payment_url, &format!("v1/price/bytes/{bytes}"))?;
            debug!(%url, "Requesting price quote");

            let response = check_status(self.client.get(url).send().await?).await?;
            let price: PriceResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(format!("price quote: {e}")))?;

            quotes.push(CostQuote { winc: price.winc });
        }

        Ok(quotes)
    }

    #[instrument(skip(self, stream, tags), fields(tags = tags.len()))]
    async fn upload(&self, stream: StreamFactory, size: u64, tags: Vec<Tag>) -> Result<UploadReceipt> {
        let data = read_exact(&stream, size).await?;
        let item = DataItem::sign(&self.wallet, data, tags)?;
        let item_id = item.id();
        let body = item.to_bytes();

        let url = join(&self.upload_url, &format!("v1/tx/{}", self.token))?;
        debug!(%url, data_item_id = %item_id, data_item_bytes = body.len(), "Posting signed data item");

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;
        let receipt: UploadReceipt = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("upload receipt: {e}")))?;

        if receipt.id != item_id {
            warn!(
                expected = %item_id,
                returned = %receipt.id,
                "Upload service returned an id that differs from the signed data item"
            );
        }

        info!(id = %receipt.id, size, "Data item accepted");
        Ok(receipt)
    }

    #[instrument(skip(self))]
    async fn fetch(&self, id: &str) -> Result<Bytes> {
        let url = join(&self.gateway_url, id)?;
        let response = self.client.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(id.to_string()));
        }

        Ok(check_status(response).await?.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_item::SignatureType;
    use crate::test_utils::{ARWEAVE_TEST_WALLET, install_crypto_provider};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_with_wallet(server: &MockServer, wallet: Wallet) -> TurboProvider {
        install_crypto_provider();
        let url: Url = server.uri().parse().unwrap();
        let config = TurboConfig {
            upload_url: url.clone(),
            payment_url: url.clone(),
            gateway_url: url,
            ..Default::default()
        };
        TurboProvider::new(config, wallet).unwrap()
    }

    fn provider_for(server: &MockServer) -> TurboProvider {
        provider_with_wallet(server, Wallet::from_secret_bytes([3u8; 32]))
    }

    #[test]
    fn test_ensure_slash() {
        let url: Url = "https://example.com/api".parse().unwrap();
        assert_eq!(ensure_slash(&url).join("v1").unwrap().as_str(), "https://example.com/api/v1");

        let url: Url = "https://example.com/".parse().unwrap();
        assert_eq!(ensure_slash(&url).as_str(), "https://example.com/");
    }

    #[tokio::test]
    async fn test_estimate_cost_parses_string_winc() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/price/bytes/10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"winc": "42", "adjustments": []})))
            .expect(1)
            .mount(&server)
            .await;

        let quotes = provider_for(&server).estimate_cost(&[10]).await.unwrap();
        assert_eq!(quotes, vec![CostQuote { winc: 42 }]);
    }

    #[tokio::test]
    async fn test_estimate_cost_one_quote_per_length() {
        let server = MockServer::start().await;
        for (bytes, winc) in [(0u64, 0u64), (1024, 99_000)] {
            Mock::given(method("GET"))
                .and(path(format!("/v1/price/bytes/{bytes}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "winc": winc })))
                .mount(&server)
                .await;
        }

        let quotes = provider_for(&server).estimate_cost(&[1024, 0]).await.unwrap();
        assert_eq!(quotes, vec![CostQuote { winc: 99_000 }, CostQuote { winc: 0 }]);
    }

    #[tokio::test]
    async fn test_estimate_cost_surfaces_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("pricing unavailable"))
            .mount(&server)
            .await;

        let err = provider_for(&server).estimate_cost(&[5]).await.unwrap_err();
        match err {
            ProviderError::Api { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "pricing unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_posts_signed_data_item() {
        let server = MockServer::start().await;
        let provider = provider_for(&server);
        Mock::given(method("POST"))
            .and(path("/v1/tx/solana"))
            .and(header("content-type", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "abc",
                "owner": provider.wallet().address(),
                "dataCaches": ["arweave.net"],
                "fastFinalityIndexes": ["arweave.net"],
                "winc": "0"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tags = vec![Tag::new("Content-Type", "text/plain"), Tag::new("File-Name", "a.txt")];
        let stream = StreamFactory::new(Bytes::from_static(b"0123456789")).with_chunk_size(4);
        let receipt = provider.upload(stream, 10, tags.clone()).await.unwrap();

        assert_eq!(
            receipt,
            UploadReceipt {
                id: "abc".to_string(),
                data_caches: vec!["arweave.net".to_string()],
                fast_finality_indexes: vec!["arweave.net".to_string()],
            }
        );

        let requests = server.received_requests().await.unwrap();
        let item = DataItem::parse(&requests[0].body).unwrap();
        item.verify().unwrap();
        assert_eq!(item.data(), &Bytes::from_static(b"0123456789"));
        assert_eq!(item.tags(), &tags[..]);
        assert_eq!(item.owner(), &provider.wallet().owner()[..]);
    }

    #[tokio::test]
    async fn test_upload_with_arweave_wallet_posts_rsa_item() {
        let server = MockServer::start().await;
        let provider = provider_with_wallet(&server, Wallet::from_json(ARWEAVE_TEST_WALLET).unwrap());
        Mock::given(method("POST"))
            .and(path("/v1/tx/arweave"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "rsa-id",
                "dataCaches": ["arweave.net"],
                "fastFinalityIndexes": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let stream = StreamFactory::new(Bytes::from_static(b"{\"hello\":\"world\"}"));
        let receipt = provider.upload(stream, 17, Vec::new()).await.unwrap();
        assert_eq!(receipt.id, "rsa-id");

        let requests = server.received_requests().await.unwrap();
        let item = DataItem::parse(&requests[0].body).unwrap();
        assert_eq!(item.signature_type(), SignatureType::Arweave);
        assert_eq!(item.owner(), &provider.wallet().owner()[..]);
        item.verify().unwrap();
    }

    #[tokio::test]
    async fn test_configured_token_overrides_wallet_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tx/ed25519"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "abc",
                "dataCaches": [],
                "fastFinalityIndexes": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        install_crypto_provider();
        let url: Url = server.uri().parse().unwrap();
        let config = TurboConfig {
            upload_url: url,
            token: Some("ed25519".to_string()),
            ..Default::default()
        };
        let provider = TurboProvider::new(config, Wallet::from_secret_bytes([3u8; 32])).unwrap();

        provider.upload(StreamFactory::new(Bytes::from_static(b"x")), 1, Vec::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_rejects_length_mismatch_before_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        let stream = StreamFactory::new(Bytes::from_static(b"short"));
        let err = provider_for(&server).upload(stream, 99, Vec::new()).await.unwrap_err();

        assert!(matches!(err, ProviderError::LengthMismatch { expected: 99, actual: 5 }));
    }

    #[tokio::test]
    async fn test_upload_surfaces_api_error_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/tx/solana"))
            .respond_with(ResponseTemplate::new(402).set_body_string("Insufficient balance"))
            .mount(&server)
            .await;

        let stream = StreamFactory::new(Bytes::from_static(b"{}"));
        let err = provider_for(&server).upload(stream, 2, Vec::new()).await.unwrap_err();

        assert!(matches!(err, ProviderError::Api { status: 402, ref body } if body == "Insufficient balance"));
    }

    #[tokio::test]
    async fn test_fetch_reads_from_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        assert_eq!(provider.fetch("abc").await.unwrap(), Bytes::from_static(b"hello"));
        assert!(matches!(provider.fetch("missing").await, Err(ProviderError::NotFound(id)) if id == "missing"));
    }
}

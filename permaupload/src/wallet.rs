//! Signing credential for the storage provider.
//!
//! The wallet is resolved once at startup from the configured [`WalletSource`] and handed to
//! the provider that signs uploads. Three JSON encodings are accepted:
//!
//! - an Arweave RSA JWK: `{"kty": "RSA", "n": ..., "e": ..., "d": ..., "p": ..., "q": ...}`,
//!   as exported by Arweave wallets. The modulus must be 4096 bits.
//! - an Ed25519 keypair byte array, `[u8; 64]` (secret followed by public key) or `[u8; 32]`
//!   (secret only)
//! - an Ed25519 OKP JWK: `{"kty": "OKP", "crv": "Ed25519", "d": "<base64url>", "x": "<base64url>"}`
//!
//! When the credential comes from an environment variable the value is base64-encoded JSON and
//! may carry a leading `NAME=` label (as produced by copying a line out of a `.env` file).

use std::path::{Path, PathBuf};

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use ed25519_dalek::{SECRET_KEY_LENGTH, Signer, SigningKey};
use rsa::{BigUint, Pss, RsaPrivateKey, traits::PublicKeyParts};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::config::WalletSource;
use crate::data_item::SignatureType;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Wallet environment variable {0} is not set")]
    MissingEnv(String),

    #[error("Failed to read wallet file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Wallet is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Wallet is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid wallet key: {0}")]
    InvalidKey(String),

    #[error("Failed to sign: {0}")]
    Signing(String),
}

#[derive(Deserialize)]
struct OkpJwk {
    crv: String,
    d: String,
    #[serde(default)]
    x: Option<String>,
}

#[derive(Deserialize)]
struct RsaJwk {
    n: String,
    e: String,
    d: String,
    p: String,
    q: String,
}

#[derive(Clone)]
enum Key {
    Ed25519(SigningKey),
    Arweave(Box<RsaPrivateKey>),
}

/// A signing key used to sign data items.
#[derive(Clone)]
pub struct Wallet {
    key: Key,
}

fn decode_b64url(field: &str, value: &str) -> Result<Vec<u8>, WalletError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| WalletError::InvalidKey(format!("JWK \"{field}\" is not base64url: {e}")))
}

impl Wallet {
    pub fn from_secret_bytes(secret: [u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            key: Key::Ed25519(SigningKey::from_bytes(&secret)),
        }
    }

    /// Resolve the wallet from its configured source, reading the process environment.
    pub fn resolve(source: &WalletSource) -> Result<Self, WalletError> {
        Self::resolve_with(source, |name| std::env::var(name).ok())
    }

    /// Resolve the wallet using `lookup` for environment variables.
    #[instrument(skip_all)]
    pub fn resolve_with(source: &WalletSource, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WalletError> {
        let wallet = match source {
            WalletSource::Env { var } => {
                let value = lookup(var).ok_or_else(|| WalletError::MissingEnv(var.clone()))?;
                Self::from_env_value(&value, var)?
            }
            WalletSource::File { path } => Self::from_file(path)?,
        };

        info!(
            address = %wallet.address(),
            signature_type = ?wallet.signature_type(),
            "Loaded signing wallet"
        );
        Ok(wallet)
    }

    /// Decode a base64 environment value, stripping an optional `label=` prefix.
    pub fn from_env_value(value: &str, label: &str) -> Result<Self, WalletError> {
        let value = value.trim();
        let value = value.strip_prefix(&format!("{label}=")).unwrap_or(value);
        let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
        let decoded = STANDARD.decode(compact)?;
        let json = String::from_utf8(decoded).map_err(|_| WalletError::InvalidKey("decoded wallet is not UTF-8".to_string()))?;
        Self::from_json(&json)
    }

    pub fn from_file(path: &Path) -> Result<Self, WalletError> {
        let json = std::fs::read_to_string(path).map_err(|source| WalletError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        let value: Value = serde_json::from_str(json)?;
        if value.is_array() {
            let bytes: Vec<u8> = serde_json::from_value(value)?;
            return Self::from_key_bytes(&bytes);
        }

        let kty = value.get("kty").and_then(Value::as_str).map(str::to_owned);
        match kty.as_deref() {
            Some("RSA") => Self::from_rsa_jwk(serde_json::from_value(value)?),
            Some("OKP") => Self::from_okp_jwk(serde_json::from_value(value)?),
            Some(other) => Err(WalletError::InvalidKey(format!(
                "unsupported JWK key type {other}, expected RSA or OKP"
            ))),
            None => Err(WalletError::InvalidKey(
                "expected a JWK object or a key byte array".to_string(),
            )),
        }
    }

    fn from_key_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        match bytes.len() {
            32 => {
                let mut secret = [0u8; SECRET_KEY_LENGTH];
                secret.copy_from_slice(bytes);
                Ok(Self::from_secret_bytes(secret))
            }
            64 => {
                let mut keypair = [0u8; 64];
                keypair.copy_from_slice(bytes);
                let signing_key = SigningKey::from_keypair_bytes(&keypair)
                    .map_err(|_| WalletError::InvalidKey("public key does not match secret key".to_string()))?;
                Ok(Self {
                    key: Key::Ed25519(signing_key),
                })
            }
            n => Err(WalletError::InvalidKey(format!("expected 32 or 64 key bytes, got {n}"))),
        }
    }

    fn from_okp_jwk(jwk: OkpJwk) -> Result<Self, WalletError> {
        if jwk.crv != "Ed25519" {
            return Err(WalletError::InvalidKey(format!(
                "unsupported OKP curve {}, expected Ed25519",
                jwk.crv
            )));
        }

        let secret: [u8; SECRET_KEY_LENGTH] = decode_b64url("d", &jwk.d)?
            .try_into()
            .map_err(|_| WalletError::InvalidKey("JWK \"d\" must be 32 bytes".to_string()))?;
        let wallet = Self::from_secret_bytes(secret);

        if let Some(x) = &jwk.x
            && decode_b64url("x", x)? != wallet.owner()
        {
            return Err(WalletError::InvalidKey("JWK \"x\" does not match \"d\"".to_string()));
        }

        Ok(wallet)
    }

    fn from_rsa_jwk(jwk: RsaJwk) -> Result<Self, WalletError> {
        let n = decode_b64url("n", &jwk.n)?;
        let expected = SignatureType::Arweave.owner_len();
        if n.len() != expected {
            return Err(WalletError::InvalidKey(format!(
                "RSA modulus must be {expected} bytes, got {}",
                n.len()
            )));
        }

        let key = RsaPrivateKey::from_components(
            BigUint::from_bytes_be(&n),
            BigUint::from_bytes_be(&decode_b64url("e", &jwk.e)?),
            BigUint::from_bytes_be(&decode_b64url("d", &jwk.d)?),
            vec![
                BigUint::from_bytes_be(&decode_b64url("p", &jwk.p)?),
                BigUint::from_bytes_be(&decode_b64url("q", &jwk.q)?),
            ],
        )
        .map_err(|e| WalletError::InvalidKey(format!("RSA key: {e}")))?;
        key.validate()
            .map_err(|e| WalletError::InvalidKey(format!("RSA key: {e}")))?;

        Ok(Self {
            key: Key::Arweave(Box::new(key)),
        })
    }

    /// ANS-104 signature type produced by this key.
    pub fn signature_type(&self) -> SignatureType {
        match &self.key {
            Key::Ed25519(_) => SignatureType::Ed25519,
            Key::Arweave(_) => SignatureType::Arweave,
        }
    }

    /// Payment token Turbo associates with this key type.
    pub fn default_token(&self) -> &'static str {
        match &self.key {
            Key::Ed25519(_) => "solana",
            Key::Arweave(_) => "arweave",
        }
    }

    /// Public key as carried in the `owner` field of signed data items: the raw Ed25519 key, or
    /// the big-endian RSA modulus.
    pub fn owner(&self) -> Vec<u8> {
        match &self.key {
            Key::Ed25519(key) => key.verifying_key().to_bytes().to_vec(),
            Key::Arweave(key) => key.n().to_bytes_be(),
        }
    }

    /// Normalized address: base64url SHA-256 of the owner key.
    pub fn address(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(self.owner()))
    }

    /// Sign `message`: Ed25519 directly, RSA as PSS over its SHA-256 digest.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, WalletError> {
        match &self.key {
            Key::Ed25519(key) => Ok(key.sign(message).to_bytes().to_vec()),
            Key::Arweave(key) => key
                .sign_with_rng(&mut rand::thread_rng(), Pss::new::<Sha256>(), &Sha256::digest(message))
                .map_err(|e| WalletError::Signing(e.to_string())),
        }
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("signature_type", &self.signature_type())
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

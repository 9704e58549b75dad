//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `PERMAUPLOAD_CONFIG`
//! environment variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `PERMAUPLOAD_` override YAML values
//!
//! For nested values use double underscores, e.g. `PERMAUPLOAD_PROVIDER__DUMMY__WINC_PER_BYTE=2`.
//!
//! ## Example
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 3000
//! max_upload_size: 52428800
//! provider:
//!   turbo:
//!     upload_url: https://upload.ardrive.io
//!     payment_url: https://payment.ardrive.io
//!     wallet:
//!       env:
//!         var: ARWEAVE_KEY
//! ```
//!
//! The wallet itself is never part of the configuration file: only where to find it.
//! See [`crate::wallet`] for the accepted key formats.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "PERMAUPLOAD_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and wallet, then exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Maximum accepted request body for `/api/upload`, in bytes
    pub max_upload_size: u64,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Cross-origin settings for browser clients served from elsewhere
    pub cors: CorsConfig,
    /// Storage provider the endpoint forwards uploads to
    pub provider: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_upload_size: 50 * 1024 * 1024,
            enable_metrics: false,
            enable_otel_export: false,
            cors: CorsConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any
    pub allowed_origins: Vec<String>,
    /// Preflight cache duration in seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            max_age: Some(3600),
        }
    }
}

/// Storage provider configuration.
///
/// Each variant maps to one implementation in [`crate::storage_providers`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderConfig {
    /// ArDrive Turbo bundling service
    Turbo(TurboConfig),
    /// In-memory provider for local development
    Dummy(DummyConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Turbo(TurboConfig::default())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TurboConfig {
    /// Upload service base URL
    pub upload_url: Url,
    /// Payment service base URL, used for price quotes
    pub payment_url: Url,
    /// Gateway used to read uploaded content back
    pub gateway_url: Url,
    /// Payment token the signing wallet belongs to. Defaults to `arweave` for RSA wallets and
    /// `solana` for Ed25519 wallets.
    pub token: Option<String>,
    /// Per-request timeout; the HTTP client default applies when unset
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    /// Where to load the signing wallet from
    pub wallet: WalletSource,
}

impl Default for TurboConfig {
    fn default() -> Self {
        Self {
            upload_url: "https://upload.ardrive.io".parse().expect("valid default URL"),
            payment_url: "https://payment.ardrive.io".parse().expect("valid default URL"),
            gateway_url: "https://arweave.net".parse().expect("valid default URL"),
            token: None,
            request_timeout: None,
            wallet: WalletSource::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DummyConfig {
    /// Price charged per payload byte, in winc
    pub winc_per_byte: u64,
    /// Number of uploads kept in memory; the oldest is evicted beyond this
    pub max_items: usize,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            winc_per_byte: 1,
            max_items: 1000,
        }
    }
}

/// Where the signing wallet is resolved from at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletSource {
    /// Base64-encoded JSON key in an environment variable
    Env {
        #[serde(default = "default_wallet_var")]
        var: String,
    },
    /// JSON key file on local disk
    File { path: PathBuf },
}

fn default_wallet_var() -> String {
    "ARWEAVE_KEY".to_string()
}

impl Default for WalletSource {
    fn default() -> Self {
        WalletSource::Env { var: default_wallet_var() }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // PERMAUPLOAD_CONFIG names the file itself and is read by clap
            .merge(Env::prefixed("PERMAUPLOAD_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.port == 0 {
            return Err(Error::Other(anyhow::anyhow!("Config validation: port must be non-zero")));
        }

        if self.max_upload_size == 0 {
            return Err(Error::Other(anyhow::anyhow!(
                "Config validation: max_upload_size must be greater than zero"
            )));
        }

        if self.max_upload_size > usize::MAX as u64 {
            return Err(Error::Other(anyhow::anyhow!(
                "Config validation: max_upload_size ({}) exceeds addressable memory",
                self.max_upload_size
            )));
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Other(anyhow::anyhow!(
                "Config validation: cors.allowed_origins cannot be empty. Add at least one allowed origin."
            )));
        }

        if let ProviderConfig::Dummy(dummy) = &self.provider
            && dummy.max_items == 0
        {
            return Err(Error::Other(anyhow::anyhow!(
                "Config validation: provider.max_items must be at least 1"
            )));
        }

        if let ProviderConfig::Turbo(turbo) = &self.provider {
            for (name, url) in [
                ("upload_url", &turbo.upload_url),
                ("payment_url", &turbo.payment_url),
                ("gateway_url", &turbo.gateway_url),
            ] {
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(Error::Other(anyhow::anyhow!(
                        "Config validation: provider.{name} must be an http(s) URL, got {url}"
                    )));
                }
            }

            if turbo.token.as_deref().is_some_and(|token| token.trim().is_empty()) {
                return Err(Error::Other(anyhow::anyhow!("Config validation: provider.token cannot be empty")));
            }

            if let WalletSource::Env { var } = &turbo.wallet
                && var.trim().is_empty()
            {
                return Err(Error::Other(anyhow::anyhow!(
                    "Config validation: provider.wallet.var cannot be empty"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.port, 3000);
            assert_eq!(config.max_upload_size, 50 * 1024 * 1024);
            match config.provider {
                ProviderConfig::Turbo(turbo) => {
                    assert_eq!(turbo.upload_url.as_str(), "https://upload.ardrive.io/");
                    assert!(turbo.token.is_none());
                    assert_eq!(turbo.wallet, WalletSource::Env { var: "ARWEAVE_KEY".into() });
                    assert!(turbo.request_timeout.is_none());
                }
                other => panic!("expected turbo provider, got {other:?}"),
            }

            Ok(())
        });
    }

    #[test]
    fn test_turbo_provider_from_yaml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
port: 8080
provider:
  turbo:
    upload_url: http://localhost:9000
    request_timeout: 30s
    wallet:
      file:
        path: /etc/permaupload/wallet.json
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.port, 8080);
            let ProviderConfig::Turbo(turbo) = config.provider else {
                panic!("expected turbo provider");
            };
            assert_eq!(turbo.upload_url.as_str(), "http://localhost:9000/");
            assert_eq!(turbo.payment_url.as_str(), "https://payment.ardrive.io/");
            assert_eq!(turbo.request_timeout, Some(Duration::from_secs(30)));
            assert_eq!(
                turbo.wallet,
                WalletSource::File {
                    path: PathBuf::from("/etc/permaupload/wallet.json")
                }
            );

            Ok(())
        });
    }

    #[test]
    fn test_dummy_provider_from_yaml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
provider:
  dummy:
    winc_per_byte: 5
    max_items: 10
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;
            let ProviderConfig::Dummy(dummy) = config.provider else {
                panic!("expected dummy provider");
            };
            assert_eq!(dummy.winc_per_byte, 5);
            assert_eq!(dummy.max_items, 10);

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "port: 4000\n")?;
            jail.set_env("PERMAUPLOAD_PORT", "8081");
            jail.set_env("PERMAUPLOAD_HOST", "127.0.0.1");
            jail.set_env("PERMAUPLOAD_PROVIDER__DUMMY__WINC_PER_BYTE", "2");
            jail.set_env("PERMAUPLOAD_CONFIG", "test.yaml");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.bind_address(), "127.0.0.1:8081");
            assert!(matches!(config.provider, ProviderConfig::Dummy(DummyConfig { winc_per_byte: 2, .. })));

            Ok(())
        });
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "prot: 4000\n")?;
            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config {
            max_upload_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_upload_size = 1024;
        config.cors.allowed_origins.clear();
        assert!(config.validate().is_err());

        config.cors.allowed_origins.push("*".to_string());
        config.provider = ProviderConfig::Turbo(TurboConfig {
            upload_url: "ftp://upload.example".parse().unwrap(),
            ..Default::default()
        });
        assert!(config.validate().is_err());

        config.provider = ProviderConfig::Dummy(DummyConfig {
            max_items: 0,
            ..Default::default()
        });
        assert!(config.validate().is_err());

        config.provider = ProviderConfig::Dummy(DummyConfig::default());
        assert!(config.validate().is_ok());
    }
}

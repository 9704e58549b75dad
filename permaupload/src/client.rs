//! Typed client for `POST /api/upload`.
//!
//! Mirrors the browser page: one trigger per payload kind, disabled while a request is pending,
//! and a status display driven by [`UploadState`]. State changes are published on a
//! [`tokio::sync::watch`] channel so a UI (or a test) can follow the whole lifecycle.
//!
//! ```text
//! Idle ──trigger──▶ InFlight ──success──▶ Succeeded ──trigger──▶ InFlight ...
//!                       └──────failure──▶ Failed    ──trigger──▶ InFlight ...
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    api::models::uploads::{UploadOutcome, UploadResponse},
    payload::{FILE_FIELD, FileUpload},
};

/// Gateway serving uploaded content by id
pub const GATEWAY_URL: &str = "https://arweave.net/";

/// Block explorer page for a transaction id
pub const EXPLORER_URL: &str = "https://viewblock.io/arweave/tx/";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("An upload is already in progress")]
    Busy,

    #[error("No file selected")]
    NoFileSelected,

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response from upload endpoint: {0}")]
    InvalidResponse(String),

    /// The endpoint answered `{success: false}`
    #[error("{0}")]
    Rejected(String),
}

/// Lifecycle of the most recent upload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UploadState {
    #[default]
    Idle,
    InFlight,
    Succeeded(UploadResponse),
    Failed(String),
}

impl UploadState {
    /// Whether the trigger accepts a new activation
    pub fn trigger_enabled(&self) -> bool {
        !matches!(self, UploadState::InFlight)
    }

    /// Text shown to the user, if any
    pub fn status_message(&self) -> Option<String> {
        match self {
            UploadState::Idle => None,
            UploadState::InFlight => Some("Starting upload...".to_string()),
            UploadState::Succeeded(response) => Some(format!("Upload successful! Transaction ID: {}", response.id)),
            UploadState::Failed(message) => Some(format!("Upload failed: {message}")),
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            UploadState::Succeeded(response) => Some(&response.id),
            _ => None,
        }
    }

    pub fn links(&self) -> Option<ViewerLinks> {
        self.transaction_id().map(ViewerLinks::for_id)
    }
}

/// External pages for viewing an uploaded transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerLinks {
    pub gateway: String,
    pub explorer: String,
}

impl ViewerLinks {
    /// The id is templated in as-is.
    pub fn for_id(id: &str) -> Self {
        Self {
            gateway: format!("{GATEWAY_URL}{id}"),
            explorer: format!("{EXPLORER_URL}{id}"),
        }
    }
}

/// Client for a running upload endpoint
pub struct UploadClient {
    http: reqwest::Client,
    endpoint: Url,
    state: watch::Sender<UploadState>,
    selected: Mutex<Option<FileUpload>>,
    completed: AtomicUsize,
}

impl UploadClient {
    /// Create a client for the server at `base_url`.
    ///
    /// Installs the aws-lc-rs rustls provider as the process default if none is installed yet.
    pub fn new(base_url: &Url) -> Result<Self, ClientError> {
        // Err means a provider is already installed
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        Self::with_client(reqwest::Client::builder().build()?, base_url)
    }

    /// Use a caller-built HTTP client, which must already have a TLS provider available.
    pub fn with_client(http: reqwest::Client, base_url: &Url) -> Result<Self, ClientError> {
        let endpoint = base_url
            .join("/api/upload")
            .map_err(|e| ClientError::InvalidResponse(format!("invalid base url {base_url}: {e}")))?;
        let (state, _) = watch::channel(UploadState::Idle);

        Ok(Self {
            http,
            endpoint,
            state,
            selected: Mutex::new(None),
            completed: AtomicUsize::new(0),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> UploadState {
        self.state.borrow().clone()
    }

    pub fn trigger_enabled(&self) -> bool {
        self.state.borrow().trigger_enabled()
    }

    /// Number of requests that have left `InFlight`, successfully or not
    pub fn completed_uploads(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Choose the file for [`UploadClient::upload_selected_file`].
    ///
    /// A finished upload's status is cleared; a pending one is left alone.
    pub async fn select_file(&self, file: FileUpload) {
        *self.selected.lock().await = Some(file);
        self.state.send_if_modified(|state| match state {
            UploadState::Succeeded(_) | UploadState::Failed(_) => {
                *state = UploadState::Idle;
                true
            }
            UploadState::Idle | UploadState::InFlight => false,
        });
    }

    /// Upload an inline JSON document.
    #[instrument(skip_all)]
    pub async fn upload_json(&self, value: &Value) -> Result<UploadResponse, ClientError> {
        self.begin()?;
        let result = self.send(self.http.post(self.endpoint.clone()).json(value)).await;
        self.finish(result)
    }

    /// Upload the file chosen with [`UploadClient::select_file`].
    #[instrument(skip_all)]
    pub async fn upload_selected_file(&self) -> Result<UploadResponse, ClientError> {
        let file = self.selected.lock().await.clone().ok_or(ClientError::NoFileSelected)?;
        self.begin()?;
        let result = match file_form(file) {
            Ok(form) => self.send(self.http.post(self.endpoint.clone()).multipart(form)).await,
            Err(err) => Err(err),
        };
        self.finish(result)
    }

    /// Move to `InFlight`, refusing if a request is already pending.
    fn begin(&self) -> Result<(), ClientError> {
        let started = self.state.send_if_modified(|state| {
            if state.trigger_enabled() {
                *state = UploadState::InFlight;
                true
            } else {
                false
            }
        });

        if started {
            Ok(())
        } else {
            warn!("Ignoring upload trigger while a request is pending");
            Err(ClientError::Busy)
        }
    }

    fn finish(&self, result: Result<UploadResponse, ClientError>) -> Result<UploadResponse, ClientError> {
        let next = match &result {
            Ok(response) => UploadState::Succeeded(response.clone()),
            Err(err) => UploadState::Failed(err.to_string()),
        };
        self.state.send_replace(next);
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<UploadResponse, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!(%status, bytes = body.len(), "Upload endpoint replied");

        match serde_json::from_slice::<UploadOutcome>(&body) {
            Ok(UploadOutcome::Success(response)) => Ok(response),
            Ok(UploadOutcome::Failure(failure)) => Err(ClientError::Rejected(failure.error)),
            Err(e) => Err(ClientError::InvalidResponse(format!("{status}: {e}"))),
        }
    }
}

fn file_form(file: FileUpload) -> Result<Form, ClientError> {
    let mut part = Part::bytes(file.bytes.to_vec()).file_name(file.file_name);
    if let Some(content_type) = &file.content_type {
        part = part.mime_str(content_type)?;
    }
    Ok(Form::new().part(FILE_FIELD, part))
}

//! Upload payloads and the re-readable byte streams handed to storage providers.
//!
//! A request arrives either as an inline JSON document or as a multipart file. Both are reduced
//! to a single immutable buffer whose length is computed exactly once; the same length is used
//! for the cost query and for the upload so the quoted price always matches the submitted bytes.

use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Multipart field carrying the file in file uploads
pub const FILE_FIELD: &str = "file";

/// Media type recorded when the client did not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// File name recorded when the multipart part carries none
pub const DEFAULT_FILE_NAME: &str = "untitled";

/// A sequential reader over a payload buffer.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Descriptive name/value pair attached to an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Factory for fresh readers over an owned, immutable buffer.
///
/// Every call to [`StreamFactory::open`] returns an independent stream starting at byte zero.
/// Cloning is cheap: clones share the underlying [`Bytes`].
#[derive(Clone)]
pub struct StreamFactory {
    buffer: Bytes,
    chunk_size: usize,
}

impl StreamFactory {
    pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

    pub fn new(buffer: Bytes) -> Self {
        Self {
            buffer,
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Open a new stream over the buffer.
    pub fn open(&self) -> ByteStream {
        let buffer = self.buffer.clone();
        let chunk_size = self.chunk_size;
        let len = buffer.len();

        futures::stream::iter((0..len).step_by(chunk_size).map(move |start| {
            let end = (start + chunk_size).min(len);
            Ok(buffer.slice(start..end))
        }))
        .boxed()
    }

    /// Open a new stream and drain it into a contiguous buffer.
    pub async fn read_all(&self) -> std::io::Result<Bytes> {
        let mut out = BytesMut::with_capacity(self.buffer.len());
        let mut stream = self.open();
        while let Some(chunk) = stream.try_next().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }
}

impl std::fmt::Debug for StreamFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFactory")
            .field("len", &self.buffer.len())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// A file received through the multipart `file` field.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Payload submitted by the client.
#[derive(Debug, Clone)]
pub enum UploadRequest {
    InlineJson(serde_json::Value),
    File(FileUpload),
}

/// Metadata echoed back for file uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
}

/// A payload reduced to bytes, ready for the cost query and upload.
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    pub stream: StreamFactory,
    /// Byte length of `stream`, fixed for the rest of the request
    pub size: u64,
    pub tags: Vec<Tag>,
    pub file: Option<FileMetadata>,
}

impl UploadRequest {
    pub fn variant(&self) -> &'static str {
        match self {
            UploadRequest::InlineJson(_) => "json",
            UploadRequest::File(_) => "file",
        }
    }

    /// Extract the payload bytes and fix their length.
    pub fn prepare(self) -> Result<PreparedUpload, serde_json::Error> {
        match self {
            UploadRequest::InlineJson(value) => {
                let buffer = Bytes::from(serde_json::to_vec(&value)?);
                let size = buffer.len() as u64;
                Ok(PreparedUpload {
                    stream: StreamFactory::new(buffer),
                    size,
                    tags: Vec::new(),
                    file: None,
                })
            }
            UploadRequest::File(file) => {
                let size = file.bytes.len() as u64;
                let file_type = file
                    .content_type
                    .filter(|ct| !ct.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

                let tags = vec![Tag::new("Content-Type", &file_type), Tag::new("File-Name", &file.file_name)];

                Ok(PreparedUpload {
                    stream: StreamFactory::new(file.bytes),
                    size,
                    tags,
                    file: Some(FileMetadata {
                        file_name: file.file_name,
                        file_type,
                        file_size: size,
                    }),
                })
            }
        }
    }
}

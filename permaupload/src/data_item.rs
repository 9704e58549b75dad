//! ANS-104 data items.
//!
//! Bundling services accept uploads as signed data items. The binary layout is:
//!
//! | field            | size                    |
//! |------------------|-------------------------|
//! | signature type   | 2 bytes, little endian  |
//! | signature        | 512 (RSA) or 64 (Ed25519) |
//! | owner            | 512 (RSA) or 32 (Ed25519) |
//! | target flag      | 1 byte (+32 if set)     |
//! | anchor flag      | 1 byte (+32 if set)     |
//! | tag count        | 8 bytes, little endian  |
//! | tag byte length  | 8 bytes, little endian  |
//! | tags             | Avro-encoded array      |
//! | data             | remainder               |
//!
//! The signature covers the SHA-384 "deep hash" of the item's fields, and the item id is the
//! base64url SHA-256 of the signature. Arweave RSA keys sign that hash with RSA-PSS/SHA-256;
//! their owner field is the modulus and the public exponent is always 65537.
//!
//! See: <https://github.com/ArweaveTeam/arweave-standards/blob/master/ans/ANS-104.md>

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rsa::{BigUint, Pss, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384};

use crate::payload::Tag;
use crate::wallet::Wallet;

const OPTIONAL_FIELD_LENGTH: usize = 32;
const ARWEAVE_PUBLIC_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

const MAX_TAGS: usize = 128;
const MAX_TAG_NAME_BYTES: usize = 1024;
const MAX_TAG_VALUE_BYTES: usize = 3072;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DataItemError {
    #[error("Data item is truncated")]
    Truncated,

    #[error("Unsupported signature type {0}")]
    UnsupportedSignatureType(u16),

    #[error("Too many tags: {0} (maximum {max})", max = MAX_TAGS)]
    TooManyTags(usize),

    #[error("Tag name is empty or exceeds {max} bytes", max = MAX_TAG_NAME_BYTES)]
    TagNameTooLong,

    #[error("Tag value is empty or exceeds {max} bytes", max = MAX_TAG_VALUE_BYTES)]
    TagValueTooLong,

    #[error("Malformed tags: {0}")]
    MalformedTags(&'static str),

    #[error("Header declares {declared} tags but {actual} were decoded")]
    TagCountMismatch { declared: u64, actual: usize },

    #[error("Invalid optional field flag {0}")]
    InvalidFlag(u8),

    #[error("Signature does not match the data item")]
    InvalidSignature,

    #[error("Signing failed: {0}")]
    Signing(String),
}

pub type Result<T> = std::result::Result<T, DataItemError>;

/// Key types a data item can be signed with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    /// Arweave RSA-4096, PSS padding
    Arweave,
    Ed25519,
}

impl SignatureType {
    pub fn code(self) -> u16 {
        match self {
            SignatureType::Arweave => 1,
            SignatureType::Ed25519 => 2,
        }
    }

    pub fn signature_len(self) -> usize {
        match self {
            SignatureType::Arweave => 512,
            SignatureType::Ed25519 => 64,
        }
    }

    pub fn owner_len(self) -> usize {
        match self {
            SignatureType::Arweave => 512,
            SignatureType::Ed25519 => 32,
        }
    }
}

impl TryFrom<u16> for SignatureType {
    type Error = DataItemError;

    fn try_from(code: u16) -> Result<Self> {
        match code {
            1 => Ok(SignatureType::Arweave),
            2 => Ok(SignatureType::Ed25519),
            other => Err(DataItemError::UnsupportedSignatureType(other)),
        }
    }
}

/// A signed ANS-104 data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    signature_type: SignatureType,
    signature: Vec<u8>,
    owner: Vec<u8>,
    target: Option<[u8; OPTIONAL_FIELD_LENGTH]>,
    anchor: Option<[u8; OPTIONAL_FIELD_LENGTH]>,
    tags: Vec<Tag>,
    raw_tags: Vec<u8>,
    data: Bytes,
}

impl DataItem {
    /// Build and sign a data item carrying `data` and `tags`.
    pub fn sign(wallet: &Wallet, data: Bytes, tags: Vec<Tag>) -> Result<Self> {
        let raw_tags = encode_tags(&tags)?;
        let signature_type = wallet.signature_type();
        let owner = wallet.owner();
        let message = signature_message(signature_type, &owner, None, None, &raw_tags, &data);
        let signature = wallet
            .sign(&message)
            .map_err(|e| DataItemError::Signing(e.to_string()))?;

        if signature.len() != signature_type.signature_len() || owner.len() != signature_type.owner_len() {
            return Err(DataItemError::Signing(format!(
                "{signature_type:?} key produced a {}-byte signature and a {}-byte owner",
                signature.len(),
                owner.len()
            )));
        }

        Ok(Self {
            signature_type,
            signature,
            owner,
            target: None,
            anchor: None,
            tags,
            raw_tags,
            data,
        })
    }

    /// Item id: base64url SHA-256 of the signature.
    pub fn id(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(&self.signature))
    }

    pub fn signature_type(&self) -> SignatureType {
        self.signature_type
    }

    pub fn owner(&self) -> &[u8] {
        &self.owner
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Check the signature against the owner key and the item's fields.
    pub fn verify(&self) -> Result<()> {
        let message = signature_message(
            self.signature_type,
            &self.owner,
            self.target.as_ref(),
            self.anchor.as_ref(),
            &self.raw_tags,
            &self.data,
        );

        match self.signature_type {
            SignatureType::Ed25519 => {
                let owner: [u8; 32] = self.owner[..].try_into().map_err(|_| DataItemError::InvalidSignature)?;
                let signature = Signature::from_slice(&self.signature).map_err(|_| DataItemError::InvalidSignature)?;
                VerifyingKey::from_bytes(&owner)
                    .and_then(|key| key.verify(&message, &signature))
                    .map_err(|_| DataItemError::InvalidSignature)
            }
            SignatureType::Arweave => {
                let key = RsaPublicKey::new(
                    BigUint::from_bytes_be(&self.owner),
                    BigUint::from_bytes_be(&ARWEAVE_PUBLIC_EXPONENT),
                )
                .map_err(|_| DataItemError::InvalidSignature)?;
                key.verify(Pss::new::<Sha256>(), &Sha256::digest(message), &self.signature)
                    .map_err(|_| DataItemError::InvalidSignature)
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let optional_len = |field: &Option<[u8; OPTIONAL_FIELD_LENGTH]>| 1 + field.map_or(0, |_| OPTIONAL_FIELD_LENGTH);
        let capacity = 2
            + self.signature.len()
            + self.owner.len()
            + optional_len(&self.target)
            + optional_len(&self.anchor)
            + 16
            + self.raw_tags.len()
            + self.data.len();

        let mut out = Vec::with_capacity(capacity);
        out.extend_from_slice(&self.signature_type.code().to_le_bytes());
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.owner);
        for field in [&self.target, &self.anchor] {
            match field {
                Some(value) => {
                    out.push(1);
                    out.extend_from_slice(value);
                }
                None => out.push(0),
            }
        }
        out.extend_from_slice(&(self.tags.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.raw_tags.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.raw_tags);
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse a serialized data item. The signature is not checked; call [`DataItem::verify`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(bytes);

        let signature_type = SignatureType::try_from(u16::from_le_bytes(reader.array()?))?;
        let signature = reader.take(signature_type.signature_len())?.to_vec();
        let owner = reader.take(signature_type.owner_len())?.to_vec();
        let target = reader.optional_field()?;
        let anchor = reader.optional_field()?;

        let tag_count = u64::from_le_bytes(reader.array()?);
        let tag_bytes_len = u64::from_le_bytes(reader.array()?);
        let tag_bytes_len = usize::try_from(tag_bytes_len).map_err(|_| DataItemError::Truncated)?;
        let raw_tags = reader.take(tag_bytes_len)?.to_vec();

        let tags = decode_tags(&raw_tags)?;
        if tags.len() as u64 != tag_count {
            return Err(DataItemError::TagCountMismatch {
                declared: tag_count,
                actual: tags.len(),
            });
        }

        Ok(Self {
            signature_type,
            signature,
            owner,
            target,
            anchor,
            tags,
            raw_tags,
            data: Bytes::copy_from_slice(reader.rest()),
        })
    }
}

fn signature_message(
    signature_type: SignatureType,
    owner: &[u8],
    target: Option<&[u8; OPTIONAL_FIELD_LENGTH]>,
    anchor: Option<&[u8; OPTIONAL_FIELD_LENGTH]>,
    raw_tags: &[u8],
    data: &[u8],
) -> [u8; 48] {
    let signature_type = signature_type.code().to_string();
    deep_hash(&DeepHashChunk::List(vec![
        DeepHashChunk::Blob(b"dataitem"),
        DeepHashChunk::Blob(b"1"),
        DeepHashChunk::Blob(signature_type.as_bytes()),
        DeepHashChunk::Blob(owner),
        DeepHashChunk::Blob(target.map_or(&[][..], |t| &t[..])),
        DeepHashChunk::Blob(anchor.map_or(&[][..], |a| &a[..])),
        DeepHashChunk::Blob(raw_tags),
        DeepHashChunk::Blob(data),
    ]))
}

/// Input to [`deep_hash`]: a byte blob or a nested list of chunks.
#[derive(Debug)]
pub enum DeepHashChunk<'a> {
    Blob(&'a [u8]),
    List(Vec<DeepHashChunk<'a>>),
}

/// Arweave deep hash (SHA-384).
pub fn deep_hash(chunk: &DeepHashChunk<'_>) -> [u8; 48] {
    match chunk {
        DeepHashChunk::Blob(data) => {
            let tag = format!("blob{}", data.len());
            sha384(&[&sha384(&[tag.as_bytes()])[..], &sha384(&[*data])[..]])
        }
        DeepHashChunk::List(children) => {
            let tag = format!("list{}", children.len());
            children
                .iter()
                .fold(sha384(&[tag.as_bytes()]), |acc, child| sha384(&[&acc[..], &deep_hash(child)[..]]))
        }
    }
}

fn sha384(parts: &[&[u8]]) -> [u8; 48] {
    let mut hasher = Sha384::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 48];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Avro-encode tags as a single array block. No tags encode to an empty buffer.
pub fn encode_tags(tags: &[Tag]) -> Result<Vec<u8>> {
    if tags.is_empty() {
        return Ok(Vec::new());
    }
    if tags.len() > MAX_TAGS {
        return Err(DataItemError::TooManyTags(tags.len()));
    }

    let mut out = Vec::new();
    write_long(&mut out, tags.len() as i64);
    for tag in tags {
        if tag.name.is_empty() || tag.name.len() > MAX_TAG_NAME_BYTES {
            return Err(DataItemError::TagNameTooLong);
        }
        if tag.value.is_empty() || tag.value.len() > MAX_TAG_VALUE_BYTES {
            return Err(DataItemError::TagValueTooLong);
        }
        write_bytes(&mut out, tag.name.as_bytes());
        write_bytes(&mut out, tag.value.as_bytes());
    }
    write_long(&mut out, 0);
    Ok(out)
}

pub fn decode_tags(raw: &[u8]) -> Result<Vec<Tag>> {
    let mut tags = Vec::new();
    if raw.is_empty() {
        return Ok(tags);
    }

    let mut reader = SliceReader::new(raw);
    loop {
        let mut count = reader.long()?;
        if count == 0 {
            break;
        }
        if count < 0 {
            // Negative block counts are followed by the block's byte size
            count = count.checked_neg().ok_or(DataItemError::MalformedTags("block count overflow"))?;
            reader.long()?;
        }
        for _ in 0..count {
            let name = reader.string()?;
            let value = reader.string()?;
            tags.push(Tag { name, value });
            if tags.len() > MAX_TAGS {
                return Err(DataItemError::TooManyTags(tags.len()));
            }
        }
    }

    if !reader.rest().is_empty() {
        return Err(DataItemError::MalformedTags("trailing bytes after tag array"));
    }
    Ok(tags)
}

fn write_long(out: &mut Vec<u8>, n: i64) {
    let mut z = ((n << 1) ^ (n >> 63)) as u64;
    while z >= 0x80 {
        out.push((z as u8 & 0x7f) | 0x80);
        z >>= 7;
    }
    out.push(z as u8);
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_long(out, bytes.len() as i64);
    out.extend_from_slice(bytes);
}

struct SliceReader<'a> {
    bytes: &'a [u8],
}

impl<'a> SliceReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(DataItemError::Truncated);
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn optional_field(&mut self) -> Result<Option<[u8; OPTIONAL_FIELD_LENGTH]>> {
        match self.take(1)?[0] {
            0 => Ok(None),
            1 => Ok(Some(self.array()?)),
            flag => Err(DataItemError::InvalidFlag(flag)),
        }
    }

    fn long(&mut self) -> Result<i64> {
        let mut z: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = *self.bytes.first().ok_or(DataItemError::MalformedTags("truncated varint"))?;
            self.bytes = &self.bytes[1..];
            if shift >= 64 {
                return Err(DataItemError::MalformedTags("varint too long"));
            }
            z |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok((z >> 1) as i64 ^ -((z & 1) as i64))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.long()?;
        let len = usize::try_from(len).map_err(|_| DataItemError::MalformedTags("negative length"))?;
        let bytes = self.take(len).map_err(|_| DataItemError::MalformedTags("truncated string"))?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DataItemError::MalformedTags("tag is not valid UTF-8"))
    }

    fn rest(&self) -> &'a [u8] {
        self.bytes
    }
}

pub mod chunks;
pub mod fernet;

use std::io::{Read, Write};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::message::{NormalizedMessage, WirePayload};

pub use chunks::CHUNK_SIZE;
pub use fernet::Fernet;

const XZ_PRESET: u32 = 6;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to compress payload: {0}")]
    Compress(std::io::Error),
    #[error("failed to decompress payload: {0}")]
    Decompress(std::io::Error),
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("invalid token: {0}")]
    InvalidToken(&'static str),
    #[error("malformed part marker")]
    MalformedMarker,
    #[error("part {0} is missing")]
    MissingPart(usize),
    #[error("part {0} appears more than once")]
    DuplicatePart(usize),
}

/// Serialize, compress, encrypt and chunk messages for transport.
#[derive(Debug, Clone)]
pub struct Packager {
    fernet: Fernet,
    chunk_size: usize,
}

impl Packager {
    pub fn new(fernet: Fernet, chunk_size: usize) -> Self {
        Self {
            fernet,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Package the transmissible fields of `message` into marked chunks.
    pub fn package(&self, message: &NormalizedMessage) -> Result<Vec<String>, PackError> {
        self.package_wire(&message.to_wire())
    }

    pub fn package_wire(&self, wire: &WirePayload) -> Result<Vec<String>, PackError> {
        let token = self.seal(wire)?;
        Ok(chunks::split_marked(&token, self.chunk_size))
    }

    /// JSON -> xz -> Fernet token
    pub fn seal(&self, wire: &WirePayload) -> Result<String, PackError> {
        let json = serde_json::to_vec(wire)?;
        let compressed = compress(&json)?;
        debug!(
            "Payload {} bytes, compressed {} bytes",
            json.len(),
            compressed.len()
        );
        self.fernet.encrypt(&compressed)
    }

    /// Fernet token -> xz -> JSON. Integrity failures are rejected.
    pub fn open(&self, token: &str, ttl: Option<Duration>) -> Result<WirePayload, PackError> {
        let compressed = self.fernet.decrypt(token, ttl)?;
        let json = decompress(&compressed)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Reassemble marked chunks (any order) and open the token.
    pub fn unpack<S: AsRef<str>>(
        &self,
        chunks: &[S],
        ttl: Option<Duration>,
    ) -> Result<WirePayload, PackError> {
        let token = chunks::reassemble(chunks)?;
        self.open(&token, ttl)
    }
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut encoder = XzEncoder::new(Vec::new(), XZ_PRESET);
    encoder.write_all(data).map_err(PackError::Compress)?;
    encoder.finish().map_err(PackError::Compress)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut out = Vec::new();
    XzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(PackError::Decompress)?;
    Ok(out)
}

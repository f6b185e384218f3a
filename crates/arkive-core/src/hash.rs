//! MD5 content digests.
//!
//! The remote archive service validates uploads with MD5 (`Content-MD5` header and
//! per-part entity tags), so every digest in the pipeline uses it.

use std::io::Read;
use std::path::Path;

use base64::Engine;
use md5::{Digest, Md5};

/// Compute the MD5 of a byte slice as a 32-character lowercase hex string.
pub fn md5_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Compute the MD5 of a file, reading it in 1 MiB chunks.
pub fn md5_file(path: &Path) -> Result<String, std::io::Error> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5Hasher::new();
    let mut buffer = vec![0u8; 1024 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finish_hex())
}

/// Convert a hex digest into the base64 form expected by the `Content-MD5` header.
pub fn hex_to_base64(hex_digest: &str) -> Result<String, hex::FromHexError> {
    let raw = hex::decode(hex_digest)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(raw))
}

/// Normalise an entity tag returned by an object store (`"abc..."` or `W/"abc..."`).
pub fn normalize_etag(etag: &str) -> String {
    etag.trim()
        .trim_start_matches("W/")
        .trim_matches('"')
        .to_ascii_lowercase()
}

/// Multi-part uploads produce composite digests of the form `<hex>-<parts>`; those
/// cannot be compared against a whole-file MD5.
pub fn is_composite_digest(digest: &str) -> bool {
    match digest.rsplit_once('-') {
        Some((head, tail)) => {
            !head.is_empty() && !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Streaming hasher for computing a digest while data is being uploaded.
#[derive(Clone, Default)]
pub struct Md5Hasher {
    inner: Md5,
}

impl Md5Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

//! Creative fingerprinting.
//!
//! A [`CreativeFingerprint`] pairs an exact content hash (MD5 of the raw
//! bytes, used only as a deduplication key) with a perceptual hash of the
//! decoded pixels. Exact equality means byte-identical creatives; a small
//! Hamming distance between perceptual hashes means visually similar ones.
//!
//! ```no_run
//! use adledger_core::Fingerprinter;
//!
//! let bytes = std::fs::read("banner.png").unwrap();
//! let fingerprint = Fingerprinter::new().fingerprint(&bytes)?;
//! println!("{}", fingerprint.exact_hash);
//! # Ok::<(), adledger_core::AdLedgerError>(())
//! ```

pub mod perceptual;

pub use perceptual::{
    decode_creative, difference_hash, PerceptualHash, PERCEPTUAL_HASH_BITS,
};

use std::fmt;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AdLedgerError, Result};

/// Exact hash size in bytes (128 bits).
pub const EXACT_HASH_SIZE: usize = 16;

/// MD5 digest of a creative's raw bytes, serialized as 32 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ExactHash([u8; EXACT_HASH_SIZE]);

impl ExactHash {
    /// Hash raw bytes.
    pub fn of(data: &[u8]) -> Self {
        let digest = Md5::digest(data);
        let mut bytes = [0u8; EXACT_HASH_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; EXACT_HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; EXACT_HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        hex::decode(hex_str)
            .map_err(|e| AdLedgerError::Decode(format!("Invalid exact hash hex: {e}")))?
            .try_into()
            .map(Self)
            .map_err(|v: Vec<u8>| {
                AdLedgerError::Decode(format!(
                    "Exact hash must be {EXACT_HASH_SIZE} bytes, got {}",
                    v.len()
                ))
            })
    }
}

impl fmt::Display for ExactHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<ExactHash> for String {
    fn from(hash: ExactHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for ExactHash {
    type Error = AdLedgerError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl std::str::FromStr for ExactHash {
    type Err = AdLedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// Fingerprint of one observed creative instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreativeFingerprint {
    /// Digest of the raw bytes.
    pub exact_hash: ExactHash,
    /// Difference hash of the decoded image. `None` when the bytes could not
    /// be decoded and the caller chose to dedup on the exact hash alone.
    pub perceptual_hash: Option<PerceptualHash>,
}

impl CreativeFingerprint {
    pub fn new(exact_hash: ExactHash, perceptual_hash: PerceptualHash) -> Self {
        Self {
            exact_hash,
            perceptual_hash: Some(perceptual_hash),
        }
    }

    /// Exact-hash-only fingerprint. Never fails; such fingerprints can only
    /// match a ledger record exactly.
    pub fn exact_only(bytes: &[u8]) -> Self {
        Self {
            exact_hash: ExactHash::of(bytes),
            perceptual_hash: None,
        }
    }

    /// `true` when both fingerprints carry perceptual hashes within `threshold`.
    pub fn is_near(&self, other: &Self, threshold: u32) -> bool {
        match (self.perceptual_hash, other.perceptual_hash) {
            (Some(a), Some(b)) => a.is_near(&b, threshold),
            _ => false,
        }
    }
}

/// Computes [`CreativeFingerprint`]s from raw creative bytes. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fingerprinter;

impl Fingerprinter {
    pub fn new() -> Self {
        Self
    }

    /// Fingerprint a creative.
    ///
    /// Fails with [`AdLedgerError::Decode`] when the bytes are not a supported
    /// raster image (JPEG, PNG, GIF, WebP).
    pub fn fingerprint(&self, bytes: &[u8]) -> Result<CreativeFingerprint> {
        let exact_hash = ExactHash::of(bytes);
        let image = decode_creative(bytes)?;
        let perceptual_hash = difference_hash(&image);

        debug!(
            exact_hash = %exact_hash,
            perceptual_hash = %perceptual_hash,
            width = image.width(),
            height = image.height(),
            "Fingerprinted creative"
        );

        Ok(CreativeFingerprint::new(exact_hash, perceptual_hash))
    }

    /// Check if the provided bytes appear to be a supported image format.
    pub fn is_supported_format(data: &[u8]) -> bool {
        image::guess_format(data).is_ok()
    }
}

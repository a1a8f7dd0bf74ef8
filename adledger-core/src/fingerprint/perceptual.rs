//! Perceptual hashing for creatives.
//!
//! # Algorithm
//!
//! Difference hash (dHash, `image_hasher`'s gradient algorithm): the decoded
//! image is reduced to a 9×8 luminance grid and each cell is compared with
//! its right-hand neighbour, giving one bit per comparison (64 bits). The hash survives recompression and mild
//! resizing because only relative brightness between neighbouring regions is
//! kept. A different creative produces an unrelated bit pattern, so this is a
//! similarity hash, not an identity hash.
//!
//! # Usage
//!
//! ```no_run
//! use adledger_core::fingerprint::{difference_hash, decode_creative};
//!
//! let bytes = std::fs::read("banner.gif").unwrap();
//! let image = decode_creative(&bytes).unwrap();
//! let hash = difference_hash(&image);
//! println!("{}", hash.to_hex());
//! ```

use std::fmt;
use std::io::Cursor;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, ImageFormat};
use image_hasher::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};

use crate::error::{AdLedgerError, Result};

/// Hash width in bits.
pub const PERCEPTUAL_HASH_BITS: u32 = 64;

/// Comparisons per row.
const GRID_WIDTH: u32 = 8;

/// Rows compared.
const GRID_HEIGHT: u32 = 8;

/// 64-bit difference hash, serialized as 16 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PerceptualHash(u64);

impl PerceptualHash {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Number of differing bits between two hashes.
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// `true` when the two hashes are within `threshold` bits of each other.
    pub fn is_near(&self, other: &Self, threshold: u32) -> bool {
        self.hamming_distance(other) <= threshold
    }

    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != 16 {
            return Err(AdLedgerError::Decode(format!(
                "Perceptual hash must be 16 hex digits, got {}",
                hex_str.len()
            )));
        }
        u64::from_str_radix(hex_str, 16)
            .map(Self)
            .map_err(|e| AdLedgerError::Decode(format!("Invalid perceptual hash hex: {e}")))
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<PerceptualHash> for String {
    fn from(hash: PerceptualHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for PerceptualHash {
    type Error = AdLedgerError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

/// Decode creative bytes into a single representative image.
///
/// Animated GIFs are reduced to their first frame so that re-encodes which
/// keep the opening frame hash identically.
pub fn decode_creative(bytes: &[u8]) -> Result<DynamicImage> {
    let format = image::guess_format(bytes)
        .map_err(|e| AdLedgerError::Decode(format!("Unrecognized image format: {e}")))?;

    if format == ImageFormat::Gif {
        let decoder = GifDecoder::new(Cursor::new(bytes))
            .map_err(|e| AdLedgerError::Decode(format!("Failed to read GIF: {e}")))?;
        let frame = decoder
            .into_frames()
            .next()
            .ok_or_else(|| AdLedgerError::Decode("GIF contains no frames".into()))?
            .map_err(|e| AdLedgerError::Decode(format!("Failed to decode GIF frame: {e}")))?;
        return Ok(DynamicImage::ImageRgba8(frame.into_buffer()));
    }

    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| AdLedgerError::Decode(format!("Failed to decode image: {e}")))
}

/// Compute the difference hash of a decoded image.
///
/// Uses the gradient (dHash) algorithm over an 8×8 comparison grid; the
/// hasher's 8 output bytes are packed big-endian.
pub fn difference_hash(image: &DynamicImage) -> PerceptualHash {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(GRID_WIDTH, GRID_HEIGHT)
        .to_hasher();
    let hash = hasher.hash_image(image);

    let raw = hash.as_bytes();
    let mut bytes = [0u8; 8];
    let len = raw.len().min(bytes.len());
    bytes[..len].copy_from_slice(&raw[..len]);
    PerceptualHash(u64::from_be_bytes(bytes))
}

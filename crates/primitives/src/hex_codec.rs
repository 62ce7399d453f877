//! Conversions between fixed-width byte buffers and normalized hex strings.
//!
//! The normalized form is lowercase and carries no `0x` prefix. Every comparison of
//! measurement values goes through [`normalize_hex`], so `0xAABB`, `AABB` and `aabb` are the
//! same value.

use thiserror::Error;

const HEX_PREFIX: &str = "0x";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HexError {
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid hex string: {0}")]
    InvalidHex(hex::FromHexError),
}

/// Trims surrounding whitespace, strips a single `0x` prefix and lowercases `value`.
pub fn normalize_hex(value: &str) -> String {
    let lowercase = value.trim().to_ascii_lowercase();
    lowercase
        .strip_prefix(HEX_PREFIX)
        .unwrap_or(&lowercase)
        .to_string()
}

/// Compares two hex strings after normalization.
pub fn hex_eq(left: &str, right: &str) -> bool {
    normalize_hex(left) == normalize_hex(right)
}

/// Encodes `bytes` in the normalized form.
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(bytes)
}

/// Decodes a hex string of any casing/prefix into a buffer of exactly `N` bytes.
pub fn decode_fixed<const N: usize>(value: &str) -> Result<[u8; N], HexError> {
    let decoded = decode(value)?;
    let actual = decoded.len();
    decoded
        .try_into()
        .map_err(|_| HexError::InvalidLength {
            expected: N,
            actual,
        })
}

/// Decodes a hex string of any casing/prefix into a byte vector.
pub fn decode(value: &str) -> Result<Vec<u8>, HexError> {
    hex::decode(normalize_hex(value)).map_err(HexError::InvalidHex)
}

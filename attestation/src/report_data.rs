use core::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha384, Sha512};
use thiserror::Error;

/// Number of bytes for the report data.
/// report_data: [u8; 64] =
///   [hash(nonce || issued_at (8 bytes big endian) || peer public key) || zero padding]
pub const REPORT_DATA_SIZE: usize = 64;

pub const NONCE_SIZE: usize = 32;
pub const TIMESTAMP_SIZE: usize = 8;
pub const PUBLIC_KEY_SIZE: usize = 32;

const BINDING_INPUT_SIZE: usize = NONCE_SIZE + TIMESTAMP_SIZE + PUBLIC_KEY_SIZE;

const TIMESTAMP_OFFSET: usize = NONCE_SIZE;
const PUBLIC_KEY_OFFSET: usize = TIMESTAMP_OFFSET + TIMESTAMP_SIZE;

const SHA384_SIZE: usize = 48;

// Compile-time assertions
const _: () = {
    assert!(
        SHA384_SIZE <= REPORT_DATA_SIZE,
        "Digest must not exceed report data size."
    );
    assert!(
        PUBLIC_KEY_OFFSET + PUBLIC_KEY_SIZE == BINDING_INPUT_SIZE,
        "Public key must be the last field of the binding input."
    );
};

/// Hash function used to compress the freshness binding into the report data field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportDataHash {
    /// SHA-512 fills the report data exactly.
    #[default]
    Sha512,
    /// SHA-384, right-padded with zeros to [`REPORT_DATA_SIZE`].
    Sha384,
}

impl fmt::Display for ReportDataHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha512 => f.write_str("sha512"),
            Self::Sha384 => f.write_str("sha384"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("invalid input size for {field}: expected {expected} bytes, got {actual}")]
    InvalidInputSize {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Freshness material bound into a single attestation request. Created once per handshake
/// attempt and dropped as soon as the report has been obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessBinding {
    nonce: [u8; NONCE_SIZE],
    issued_at: u64,
    peer_public_key: [u8; PUBLIC_KEY_SIZE],
}

impl FreshnessBinding {
    pub fn new(
        nonce: [u8; NONCE_SIZE],
        issued_at: u64,
        peer_public_key: [u8; PUBLIC_KEY_SIZE],
    ) -> Self {
        Self {
            nonce,
            issued_at,
            peer_public_key,
        }
    }

    /// Builds a binding from raw buffers, checking every field width. `issued_at` is the
    /// 8-byte big-endian encoding of the timestamp.
    pub fn from_slices(
        nonce: &[u8],
        issued_at: &[u8],
        peer_public_key: &[u8],
    ) -> Result<Self, BindingError> {
        let nonce = fixed_width::<NONCE_SIZE>("nonce", nonce)?;
        let issued_at = fixed_width::<TIMESTAMP_SIZE>("issued_at", issued_at)?;
        let peer_public_key = fixed_width::<PUBLIC_KEY_SIZE>("peer_public_key", peer_public_key)?;

        Ok(Self::new(
            nonce,
            u64::from_be_bytes(issued_at),
            peer_public_key,
        ))
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }

    pub fn peer_public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.peer_public_key
    }

    /// Generates the report data embedded into the attestation request.
    ///
    /// Format:
    /// [hash(nonce || issued_at (8 bytes big endian) || peer public key) || zero padding]
    pub fn report_data(&self, hash: ReportDataHash) -> ReportData {
        let input = self.binding_input();
        let mut report_data = [0u8; REPORT_DATA_SIZE];

        match hash {
            ReportDataHash::Sha512 => {
                let digest: [u8; REPORT_DATA_SIZE] = Sha512::digest(input).into();
                report_data.copy_from_slice(&digest);
            }
            ReportDataHash::Sha384 => {
                let digest: [u8; SHA384_SIZE] = Sha384::digest(input).into();
                report_data[..SHA384_SIZE].copy_from_slice(&digest);
                // Remaining bytes are already zero-padded by default
            }
        }

        ReportData(report_data)
    }

    fn binding_input(&self) -> [u8; BINDING_INPUT_SIZE] {
        let mut input = [0u8; BINDING_INPUT_SIZE];
        input[..NONCE_SIZE].copy_from_slice(&self.nonce);
        input[TIMESTAMP_OFFSET..][..TIMESTAMP_SIZE].copy_from_slice(&self.issued_at.to_be_bytes());
        input[PUBLIC_KEY_OFFSET..][..PUBLIC_KEY_SIZE].copy_from_slice(&self.peer_public_key);
        input
    }
}

fn fixed_width<const N: usize>(field: &'static str, bytes: &[u8]) -> Result<[u8; N], BindingError> {
    bytes
        .try_into()
        .map_err(|_| BindingError::InvalidInputSize {
            field,
            expected: N,
            actual: bytes.len(),
        })
}

/// The 64-byte report data field of a TDX quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportData([u8; REPORT_DATA_SIZE]);

impl ReportData {
    pub fn to_bytes(&self) -> [u8; REPORT_DATA_SIZE] {
        self.0
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for ReportData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; REPORT_DATA_SIZE]> for ReportData {
    fn from(bytes: [u8; REPORT_DATA_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<ReportData> for [u8; REPORT_DATA_SIZE] {
    fn from(report_data: ReportData) -> Self {
        report_data.0
    }
}

impl From<&ReportData> for [u8; REPORT_DATA_SIZE] {
    fn from(report_data: &ReportData) -> Self {
        report_data.0
    }
}

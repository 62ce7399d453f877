use core::{fmt, marker::PhantomData, str::FromStr};

use derive_more::{AsRef, Deref, Into};
use serde_with::serde_as;

use crate::hex_codec::{self, HexError};

/// Width of every TDX measurement register (SHA-384).
pub const MEASUREMENT_SIZE: usize = 48;

#[serde_as]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Deref, AsRef, Into,
)]
#[serde(transparent)]
pub struct Hash48<T> {
    #[deref]
    #[as_ref]
    #[into]
    #[serde_as(as = "serde_with::hex::Hex")]
    bytes: [u8; MEASUREMENT_SIZE],
    #[into(skip)]
    _marker: PhantomData<T>,
}

impl<T> From<[u8; MEASUREMENT_SIZE]> for Hash48<T> {
    fn from(bytes: [u8; MEASUREMENT_SIZE]) -> Self {
        Self {
            bytes,
            _marker: PhantomData,
        }
    }
}

impl<T> Hash48<T> {
    /// Converts the hash to its normalized (lowercase, unprefixed) hex representation.
    pub fn as_hex(&self) -> String {
        hex_codec::encode(self.bytes)
    }

    pub fn try_from_hex(value: &str) -> Result<Self, HexError> {
        hex_codec::decode_fixed::<MEASUREMENT_SIZE>(value).map(Self::from)
    }
}

impl<T> FromStr for Hash48<T> {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from_hex(s)
    }
}

impl<T> fmt::Display for Hash48<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

// Marker types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Mrtd;
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Rtmr;

/// MRTD of a trust domain: the infrastructure measurement covering the virtual firmware. It is
/// invariant across application deployments on the same platform image.
pub type InfrastructureMeasurement = Hash48<Mrtd>;

/// Value of one of the four runtime measurement registers (RTMR0..RTMR3), extended during boot
/// with the bootloader, kernel, initrd and application measurements.
pub type RuntimeMeasurement = Hash48<Rtmr>;

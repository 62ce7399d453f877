use std::path::Path;

use anyhow::Context;
use attestation::{
    integrity_log::{FileIntegrityLog, HttpIntegrityLog, IntegrityLogError, IntegrityLogSource},
    report_data::{BindingError, FreshnessBinding},
};
use attestation_primitives::hex_codec;

use crate::cli::{BindingArgs, VerifyArgs};

/// Binding material as given on the command line. Widths are checked when the binding is built.
#[derive(Debug, Clone)]
pub struct BindingInput {
    nonce: Vec<u8>,
    issued_at: u64,
    public_key: Vec<u8>,
}

impl BindingInput {
    pub fn decode(args: &BindingArgs) -> anyhow::Result<Self> {
        Ok(Self {
            nonce: hex_codec::decode(&args.nonce).context("--nonce is not valid hex")?,
            issued_at: args.issued_at,
            public_key: hex_codec::decode(&args.public_key)
                .context("--public-key is not valid hex")?,
        })
    }

    pub fn binding(&self) -> Result<FreshnessBinding, BindingError> {
        FreshnessBinding::from_slices(
            &self.nonce,
            &self.issued_at.to_be_bytes(),
            &self.public_key,
        )
    }
}

pub fn load_quote(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read quote {}", path.display()))
}

/// The integrity log source picked on the command line.
#[derive(Debug, Clone)]
pub enum IntegritySource {
    File(FileIntegrityLog),
    Http(HttpIntegrityLog),
}

impl IntegritySource {
    pub fn from_args(args: &VerifyArgs) -> anyhow::Result<Self> {
        match (&args.integrity_log, &args.integrity_log_url) {
            (_, Some(url)) => Ok(Self::Http(
                HttpIntegrityLog::new(url.clone()).context("failed to set up integrity log client")?,
            )),
            (Some(path), None) => Ok(Self::File(FileIntegrityLog::new(path))),
            (None, None) => Ok(Self::File(FileIntegrityLog::default())),
        }
    }
}

impl IntegrityLogSource for IntegritySource {
    async fn fetch(&self) -> Result<String, IntegrityLogError> {
        match self {
            Self::File(source) => source.fetch().await,
            Self::Http(source) => source.fetch().await,
        }
    }
}

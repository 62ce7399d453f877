//! Quote acquisition through the Linux configfs-tsm report interface.
//!
//! Every request gets its own entry directory under the report root. The kernel fills
//! `outblob` once `inblob` has been written, and `provider` names the backend that produced it.

use core::future::Future;
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::report_data::REPORT_DATA_SIZE;

pub const DEFAULT_TSM_REPORT_ROOT: &str = "/sys/kernel/config/tsm/report";
pub const TDX_GUEST_PROVIDER: &str = "tdx_guest";
const DEFAULT_ENTRY_PREFIX: &str = "attestation";

const INBLOB: &str = "inblob";
const OUTBLOB: &str = "outblob";
const PROVIDER: &str = "provider";
const GENERATION: &str = "generation";

static ENTRY_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum ReportClientError {
    #[error("report data must be exactly {expected} bytes, got {actual}")]
    InvalidInputSize { expected: usize, actual: usize },
    #[error("attestation interface unavailable: {} does not exist", .0.display())]
    InterfaceUnavailable(PathBuf),
    #[error("attestation interface returned an empty report")]
    EmptyReport,
    #[error("unexpected report provider: expected {expected:?}, got {actual:?}")]
    UnexpectedProvider { expected: String, actual: String },
    #[error("report entry changed generation from {before} to {after} while reading")]
    GenerationChanged { before: u64, after: u64 },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("report task failed: {0}")]
    TaskJoin(String),
}

impl ReportClientError {
    fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }
}

/// Produces a raw attestation artifact embedding the given report data.
#[cfg_attr(test, mockall::automock)]
pub trait QuoteProvider {
    fn get_quote(
        &self,
        report_data: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, ReportClientError>> + Send;
}

#[derive(Debug, Clone)]
pub struct TsmReportClient {
    report_root: PathBuf,
    expected_provider: String,
    entry_prefix: String,
}

impl Default for TsmReportClient {
    fn default() -> Self {
        Self::new(DEFAULT_TSM_REPORT_ROOT, TDX_GUEST_PROVIDER)
    }
}

impl TsmReportClient {
    pub fn new(report_root: impl Into<PathBuf>, expected_provider: impl Into<String>) -> Self {
        Self {
            report_root: report_root.into(),
            expected_provider: expected_provider.into(),
            entry_prefix: DEFAULT_ENTRY_PREFIX.to_string(),
        }
    }

    pub fn with_entry_prefix(mut self, entry_prefix: impl Into<String>) -> Self {
        self.entry_prefix = entry_prefix.into();
        self
    }

    pub fn report_root(&self) -> &Path {
        &self.report_root
    }

    /// Runs one request synchronously. The entry is removed when this returns, on every path.
    fn request_blocking(&self, report_data: [u8; REPORT_DATA_SIZE]) -> Result<Vec<u8>, ReportClientError> {
        if !self.report_root.is_dir() {
            return Err(ReportClientError::InterfaceUnavailable(
                self.report_root.clone(),
            ));
        }
        let entry = TsmReportEntry::create(&self.report_root, &self.entry_prefix)?;
        exchange(&entry, &report_data, &self.expected_provider)
    }
}

impl QuoteProvider for TsmReportClient {
    async fn get_quote(&self, report_data: &[u8]) -> Result<Vec<u8>, ReportClientError> {
        let report_data: [u8; REPORT_DATA_SIZE] =
            report_data
                .try_into()
                .map_err(|_| ReportClientError::InvalidInputSize {
                    expected: REPORT_DATA_SIZE,
                    actual: report_data.len(),
                })?;

        // The blocking task owns the entry guard, so cleanup still runs if this future is dropped.
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.request_blocking(report_data))
            .await
            .map_err(|err| ReportClientError::TaskJoin(err.to_string()))?
    }
}

/// A report entry directory, removed on drop.
#[derive(Debug)]
pub(crate) struct TsmReportEntry {
    path: PathBuf,
}

impl TsmReportEntry {
    pub(crate) fn create(report_root: &Path, prefix: &str) -> Result<Self, ReportClientError> {
        let name = format!(
            "{prefix}-{}-{}",
            std::process::id(),
            ENTRY_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = report_root.join(name);
        fs::create_dir(&path).map_err(ReportClientError::io(format!(
            "failed to create report entry {}",
            path.display()
        )))?;
        debug!(entry = %path.display(), "created report entry");
        Ok(Self { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }
}

impl Drop for TsmReportEntry {
    fn drop(&mut self) {
        // configfs entries disappear with rmdir. A plain directory still holds its files.
        let result = match fs::remove_dir(&self.path) {
            Err(err) if err.kind() == io::ErrorKind::DirectoryNotEmpty => {
                fs::remove_dir_all(&self.path)
            }
            other => other,
        };
        if let Err(err) = result {
            warn!(entry = %self.path.display(), ?err, "failed to remove report entry");
        }
    }
}

fn read_generation(entry: &TsmReportEntry) -> Result<Option<u64>, ReportClientError> {
    let path = entry.file(GENERATION);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ReportClientError::io("failed to read generation")(err)),
    };
    raw.trim().parse::<u64>().map(Some).map_err(|err| {
        ReportClientError::io("failed to parse generation")(io::Error::new(
            io::ErrorKind::InvalidData,
            err,
        ))
    })
}

/// Writes the report data into `entry` and collects the artifact it produces.
pub(crate) fn exchange(
    entry: &TsmReportEntry,
    report_data: &[u8; REPORT_DATA_SIZE],
    expected_provider: &str,
) -> Result<Vec<u8>, ReportClientError> {
    fs::write(entry.file(INBLOB), report_data)
        .map_err(ReportClientError::io("failed to write inblob"))?;

    let generation_before = read_generation(entry)?;
    let artifact =
        fs::read(entry.file(OUTBLOB)).map_err(ReportClientError::io("failed to read outblob"))?;
    if artifact.is_empty() {
        return Err(ReportClientError::EmptyReport);
    }
    if let (Some(before), Some(after)) = (generation_before, read_generation(entry)?) {
        if before != after {
            return Err(ReportClientError::GenerationChanged { before, after });
        }
    }

    let provider = fs::read_to_string(entry.file(PROVIDER))
        .map_err(ReportClientError::io("failed to read provider"))?;
    let provider = provider.trim();
    if provider != expected_provider {
        return Err(ReportClientError::UnexpectedProvider {
            expected: expected_provider.to_string(),
            actual: provider.to_string(),
        });
    }

    Ok(artifact)
}

//! Runtime integrity (IMA) measurement log.
//!
//! Each line of the ASCII log has the form
//! `register-index template-hash template-name content-hash path`, e.g.
//! `10 91f34b5c671d73504b274a919661cf80dab1e127 ima-ng sha256:6f3c...e1 /usr/bin/app`.
//! Lines with fewer than five fields are skipped instead of failing the parse. Longer lines are
//! always kept, even when the register field is garbage.

use core::{future::Future, time::Duration};
use std::path::PathBuf;

use backon::{BackoffBuilder, ExponentialBuilder};
use http::status::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

/// Default location of the kernel's ASCII IMA measurement list.
pub const DEFAULT_IMA_LOG_PATH: &str = "/sys/kernel/security/ima/ascii_runtime_measurements";

const MIN_FIELDS: usize = 5;
const PATH_FIELD: usize = 4;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BACKOFF_DURATION: Duration = Duration::from_secs(5);
const HTTP_MAX_RETRIES: usize = 2;
/// Upper bound on a fetched log body. Real logs are a few thousand lines.
pub const MAX_INTEGRITY_LOG_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityLogEntry {
    /// `None` when the register field is not an unsigned integer.
    pub register_index: Option<u32>,
    pub template_hash: String,
    pub template_name: String,
    /// `algorithm:hex` for `ima-ng` templates, bare hex for the legacy `ima` template.
    pub content_hash: String,
    pub path: String,
}

impl IntegrityLogEntry {
    /// Parses a single log line. Returns `None` for blank lines and lines with fewer than five
    /// fields.
    pub fn parse_line(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < MIN_FIELDS {
            return None;
        }

        let register_index = fields[0].parse::<u32>().ok();
        if register_index.is_none() {
            debug!(line, "integrity log line has a non-numeric register index");
        }

        Some(Self {
            register_index,
            template_hash: fields[1].to_string(),
            template_name: fields[2].to_string(),
            content_hash: fields[3].to_string(),
            path: fields[PATH_FIELD..].join(" "),
        })
    }

    /// The hex digest part of the content hash.
    pub fn content_digest(&self) -> &str {
        match self.content_hash.split_once(':') {
            Some((_, digest)) => digest,
            None => &self.content_hash,
        }
    }

    /// The algorithm tag of the content hash, if the template carries one.
    pub fn hash_algorithm(&self) -> Option<&str> {
        self.content_hash
            .split_once(':')
            .map(|(algorithm, _)| algorithm)
    }
}

/// Lazily parses `raw` into entries. The iterator is cheap to clone, so it can be restarted.
pub fn parse_entries(raw: &str) -> impl Iterator<Item = IntegrityLogEntry> + Clone + '_ {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(IntegrityLogEntry::parse_line)
}

/// A fully materialized integrity log, in log order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityLog {
    entries: Vec<IntegrityLogEntry>,
}

impl IntegrityLog {
    pub fn parse(raw: &str) -> Self {
        Self {
            entries: parse_entries(raw).collect(),
        }
    }

    pub fn entries(&self) -> &[IntegrityLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the first measurement recorded for `path`.
    pub fn find_first(&self, path: &str) -> Option<&IntegrityLogEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }
}

impl From<Vec<IntegrityLogEntry>> for IntegrityLog {
    fn from(entries: Vec<IntegrityLogEntry>) -> Self {
        Self { entries }
    }
}

#[derive(Debug, Error)]
pub enum IntegrityLogError {
    #[error("integrity log source {source_name} is unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },
}

/// Where the runtime integrity log is fetched from. Fetched independently of the quote.
#[cfg_attr(test, mockall::automock)]
pub trait IntegrityLogSource {
    fn fetch(&self) -> impl Future<Output = Result<String, IntegrityLogError>> + Send;
}

/// Reads the log from a local file, by default the kernel's securityfs.
#[derive(Debug, Clone)]
pub struct FileIntegrityLog {
    path: PathBuf,
}

impl FileIntegrityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for FileIntegrityLog {
    fn default() -> Self {
        Self::new(DEFAULT_IMA_LOG_PATH)
    }
}

impl IntegrityLogSource for FileIntegrityLog {
    async fn fetch(&self) -> Result<String, IntegrityLogError> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| IntegrityLogError::SourceUnavailable {
                source_name: self.path.display().to_string(),
                reason: err.to_string(),
            })
    }
}

/// Fetches the log over HTTP, e.g. from a peer's public measurement endpoint.
#[derive(Debug, Clone)]
pub struct HttpIntegrityLog {
    url: Url,
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpIntegrityLog {
    pub fn new(url: Url) -> Result<Self, IntegrityLogError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| IntegrityLogError::SourceUnavailable {
                source_name: url.to_string(),
                reason: format!("failed to build HTTP client: {err}"),
            })?;
        Ok(Self {
            url,
            client,
            max_body_bytes: MAX_INTEGRITY_LOG_BYTES,
        })
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    async fn fetch_once(&self) -> Result<String, String> {
        let mut response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|err| err.to_string())?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(format!(
                "unexpected HTTP status code {status:?}, expected {:?}",
                StatusCode::OK
            ));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_body_bytes as u64 {
                return Err(format!(
                    "response body of {length} bytes exceeds the {} byte limit",
                    self.max_body_bytes
                ));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|err| err.to_string())? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(format!(
                    "response body exceeds the {} byte limit",
                    self.max_body_bytes
                ));
            }
            body.extend_from_slice(&chunk);
        }

        String::from_utf8(body).map_err(|err| format!("response body is not UTF-8: {err}"))
    }
}

impl IntegrityLogSource for HttpIntegrityLog {
    async fn fetch(&self) -> Result<String, IntegrityLogError> {
        let mut backoff = ExponentialBuilder::default()
            .with_max_delay(MAX_BACKOFF_DURATION)
            .with_max_times(HTTP_MAX_RETRIES)
            .with_jitter()
            .build();

        loop {
            match self.fetch_once().await {
                Ok(body) => break Ok(body),
                Err(reason) => match backoff.next() {
                    Some(duration) => {
                        error!(url = %self.url, %reason, "integrity log fetch failed. retrying in: {:?}", duration);
                        tokio::time::sleep(duration).await;
                    }
                    None => {
                        error!(url = %self.url, %reason, "integrity log fetch failed after {} retries", HTTP_MAX_RETRIES);
                        break Err(IntegrityLogError::SourceUnavailable {
                            source_name: self.url.to_string(),
                            reason,
                        });
                    }
                },
            }
        }
    }
}

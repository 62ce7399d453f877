use core::fmt;
use std::{collections::BTreeMap, sync::Arc};

use attestation_primitives::{
    hash::MEASUREMENT_SIZE,
    hex_codec::{self, HexError, normalize_hex},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    integrity_log::{IntegrityLog, IntegrityLogEntry},
    measurements::MeasurementSet,
    quote::RUNTIME_REGISTER_COUNT,
    verdict::{Signal, SignalOutcome, Verdict},
};

/// Runtime registers that a policy may pin. RTMR0 is covered by the infrastructure image and is
/// not part of the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionalRegister {
    Rtmr1,
    Rtmr2,
    Rtmr3,
}

impl OptionalRegister {
    pub const ALL: [OptionalRegister; 3] = [Self::Rtmr1, Self::Rtmr2, Self::Rtmr3];

    /// Index of the register in the quote.
    pub const fn index(self) -> usize {
        match self {
            Self::Rtmr1 => 1,
            Self::Rtmr2 => 2,
            Self::Rtmr3 => 3,
        }
    }

    const fn slot(self) -> usize {
        self.index() - 1
    }

    pub fn signal(self) -> Signal {
        Signal::RuntimeRegister(self.index() as u8)
    }
}

impl fmt::Display for OptionalRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rtmr{}", self.index())
    }
}

/// Measurements presented for evaluation. Values may use any hex casing or prefix. A register
/// that is `None` was not supplied and passes vacuously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub infrastructure: String,
    pub runtime: [Option<String>; RUNTIME_REGISTER_COUNT],
}

impl From<&MeasurementSet> for Candidate {
    fn from(measurements: &MeasurementSet) -> Self {
        Self {
            infrastructure: measurements.infrastructure_hex(),
            runtime: measurements.runtime.map(|register| Some(register.as_hex())),
        }
    }
}

/// Runtime integrity log as seen by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityEvidence {
    Available(IntegrityLog),
    Unavailable(String),
    /// The log was not fetched because the policy does not look at it.
    NotCollected,
}

/// Expected content hash for one file, optionally tagged with its algorithm (`sha256:ab..`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedFileHash {
    algorithm: Option<String>,
    digest: String,
}

impl ExpectedFileHash {
    pub fn parse(value: &str) -> Self {
        match value.split_once(':') {
            Some((algorithm, digest)) => Self {
                algorithm: Some(algorithm.trim().to_ascii_lowercase()),
                digest: normalize_hex(digest),
            },
            None => Self {
                algorithm: None,
                digest: normalize_hex(value),
            },
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.algorithm.as_deref()
    }

    /// Digests are compared case-insensitively. Algorithms are only compared when both the
    /// expectation and the log entry carry a tag.
    pub fn matches(&self, entry: &IntegrityLogEntry) -> bool {
        let digest_matches = normalize_hex(entry.content_digest()) == self.digest;
        let algorithm_matches = match (self.algorithm(), entry.hash_algorithm()) {
            (Some(expected), Some(actual)) => expected.eq_ignore_ascii_case(actual),
            _ => true,
        };
        digest_matches && algorithm_matches
    }
}

impl fmt::Display for ExpectedFileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.algorithm {
            Some(algorithm) => write!(f, "{algorithm}:{}", self.digest),
            None => f.write_str(&self.digest),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHashMismatch {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

/// Result of comparing the configured file hashes against an integrity log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub verified: Vec<String>,
    pub missing: Vec<String>,
    pub mismatched: Vec<FileHashMismatch>,
}

impl IntegrityReport {
    pub fn passed(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            return write!(f, "{} file hash(es) match", self.verified.len());
        }
        let mismatched: Vec<String> = self
            .mismatched
            .iter()
            .map(|m| format!("{} (expected {}, found {})", m.path, m.expected, m.actual))
            .collect();
        write!(
            f,
            "missing: [{}]; mismatched: [{}]",
            self.missing.join(", "),
            mismatched.join(", ")
        )
    }
}

/// Allow-lists a peer must satisfy.
///
/// Note the asymmetry: an empty infrastructure list denies everything, while an empty list for
/// an optional register means the register is not pinned and accepts any value.
/// [`PolicyConfig`] refuses to build either case implicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    required_infrastructure: Vec<String>,
    runtime: [Vec<String>; 3],
    required_file_hashes: BTreeMap<String, ExpectedFileHash>,
    integrity_log_required: bool,
}

impl Policy {
    pub fn new<I, S>(required_infrastructure: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            required_infrastructure: normalize_all(required_infrastructure),
            ..Default::default()
        }
    }

    pub fn with_runtime_register<I, S>(mut self, register: OptionalRegister, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.runtime[register.slot()] = normalize_all(allowed);
        self
    }

    pub fn with_file_hash(mut self, path: impl Into<String>, expected: &str) -> Self {
        self.required_file_hashes
            .insert(path.into(), ExpectedFileHash::parse(expected));
        self
    }

    pub fn with_integrity_log_required(mut self, required: bool) -> Self {
        self.integrity_log_required = required;
        self
    }

    pub fn required_infrastructure(&self) -> &[String] {
        &self.required_infrastructure
    }

    pub fn runtime_allow_list(&self, register: OptionalRegister) -> &[String] {
        &self.runtime[register.slot()]
    }

    pub fn required_file_hashes(&self) -> &BTreeMap<String, ExpectedFileHash> {
        &self.required_file_hashes
    }

    pub fn integrity_log_required(&self) -> bool {
        self.integrity_log_required
    }

    /// Whether evaluation needs the runtime integrity log at all.
    pub fn checks_integrity_log(&self) -> bool {
        !self.required_file_hashes.is_empty()
    }

    /// Evaluates every signal in a fixed order: infrastructure, rtmr1..rtmr3, integrity log.
    pub fn evaluate(&self, candidate: &Candidate, integrity: &IntegrityEvidence) -> Verdict {
        let mut signals = Vec::with_capacity(2 + OptionalRegister::ALL.len());
        signals.push(self.check_infrastructure(&candidate.infrastructure));
        for register in OptionalRegister::ALL {
            signals.push(
                self.check_runtime_register(register, candidate.runtime[register.index()].as_deref()),
            );
        }
        signals.push(self.check_integrity_log(integrity));
        Verdict::from_signals(signals)
    }

    fn check_infrastructure(&self, candidate: &str) -> SignalOutcome {
        let candidate = normalize_hex(candidate);
        if self.required_infrastructure.is_empty() {
            return SignalOutcome::fail(
                Signal::Infrastructure,
                format!("no infrastructure measurements are allow-listed, rejecting MRTD {candidate:?}"),
            );
        }
        if self.required_infrastructure.contains(&candidate) {
            SignalOutcome::pass(Signal::Infrastructure, format!("MRTD {candidate} is allow-listed"))
        } else {
            SignalOutcome::fail(
                Signal::Infrastructure,
                format!(
                    "MRTD {candidate:?} is not among {} allow-listed value(s)",
                    self.required_infrastructure.len()
                ),
            )
        }
    }

    fn check_runtime_register(
        &self,
        register: OptionalRegister,
        candidate: Option<&str>,
    ) -> SignalOutcome {
        let signal = register.signal();
        let allowed = self.runtime_allow_list(register);

        let Some(candidate) = candidate else {
            return SignalOutcome::pass(signal, format!("{register} not supplied"));
        };
        if allowed.is_empty() {
            return SignalOutcome::pass(signal, format!("{register} not pinned"));
        }

        let candidate = normalize_hex(candidate);
        if allowed.contains(&candidate) {
            SignalOutcome::pass(signal, format!("{register} {candidate} is allow-listed"))
        } else {
            SignalOutcome::fail(
                signal,
                format!(
                    "{register} {candidate:?} is not among {} allow-listed value(s)",
                    allowed.len()
                ),
            )
        }
    }

    fn check_integrity_log(&self, integrity: &IntegrityEvidence) -> SignalOutcome {
        if !self.checks_integrity_log() {
            return SignalOutcome::pass(Signal::IntegrityLog, "no file hashes configured");
        }

        let reason = match integrity {
            IntegrityEvidence::Available(log) => {
                let report = self.check_file_hashes(log);
                return if report.passed() {
                    SignalOutcome::pass(Signal::IntegrityLog, report.to_string())
                } else {
                    SignalOutcome::fail(Signal::IntegrityLog, report.to_string())
                };
            }
            IntegrityEvidence::Unavailable(reason) => reason.as_str(),
            IntegrityEvidence::NotCollected => "integrity log was not collected",
        };

        if self.integrity_log_required {
            SignalOutcome::fail(
                Signal::IntegrityLog,
                format!("integrity log is required but unavailable: {reason}"),
            )
        } else {
            SignalOutcome::pass(Signal::IntegrityLog, format!("not evaluated: {reason}"))
        }
    }

    /// Compares every configured `(path, hash)` against the first log entry for that path.
    pub fn check_file_hashes(&self, log: &IntegrityLog) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        for (path, expected) in &self.required_file_hashes {
            match log.find_first(path) {
                None => report.missing.push(path.clone()),
                Some(entry) if expected.matches(entry) => report.verified.push(path.clone()),
                Some(entry) => report.mismatched.push(FileHashMismatch {
                    path: path.clone(),
                    expected: expected.to_string(),
                    actual: entry.content_hash.clone(),
                }),
            }
        }
        report
    }
}

fn normalize_all<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|value| normalize_hex(value.as_ref()))
        .collect()
}

#[derive(Debug, Error)]
pub enum PolicyConfigError {
    #[error("failed to parse policy: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("policy must allow-list at least one infrastructure measurement")]
    EmptyInfrastructure,
    #[error("{0} must either list `allowed` values or be marked `unpinned: true`")]
    RegisterNotDeclared(OptionalRegister),
    #[error("{0} is marked `unpinned` but also lists `allowed` values")]
    ConflictingRegister(OptionalRegister),
    #[error("invalid measurement {value:?} in {field}: {source}")]
    InvalidMeasurement {
        field: String,
        value: String,
        source: HexError,
    },
    #[error("invalid expected hash for {path:?}: {reason}")]
    InvalidFileHash { path: String, reason: String },
    #[error("`integrity_log_required` is set but no `file_hashes` are configured")]
    IntegrityRequiredWithoutHashes,
}

/// Declaration of one optional register. Exactly one of `allowed` (non-empty) or `unpinned`
/// must be given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterConfig {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub unpinned: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeRegistersConfig {
    pub rtmr1: Option<RegisterConfig>,
    pub rtmr2: Option<RegisterConfig>,
    pub rtmr3: Option<RegisterConfig>,
}

impl RuntimeRegistersConfig {
    fn get(&self, register: OptionalRegister) -> Option<&RegisterConfig> {
        match register {
            OptionalRegister::Rtmr1 => self.rtmr1.as_ref(),
            OptionalRegister::Rtmr2 => self.rtmr2.as_ref(),
            OptionalRegister::Rtmr3 => self.rtmr3.as_ref(),
        }
    }
}

/// On-disk policy, e.g.
///
/// ```yaml
/// infrastructure:
///   - "0xc68518a0ebb42136c12b2275164f8c72f25fa9a34392228687ed6e9caeb9c0f1dbd895e9cf475121c029dc47e70e91fd"
/// runtime_registers:
///   rtmr1: { unpinned: true }
///   rtmr2: { allowed: ["2e36d0b61a3a20c2dfbff70c96005ff3e1c7813b4abab452570330ddebabf939393099234abc0309f03936edebf74b1f"] }
///   rtmr3: { unpinned: true }
/// file_hashes:
///   /usr/bin/app: "sha256:6f3c..."
/// integrity_log_required: false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    pub infrastructure: Vec<String>,
    #[serde(default)]
    pub runtime_registers: RuntimeRegistersConfig,
    #[serde(default)]
    pub file_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub integrity_log_required: bool,
}

impl PolicyConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, PolicyConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

impl TryFrom<PolicyConfig> for Policy {
    type Error = PolicyConfigError;

    fn try_from(config: PolicyConfig) -> Result<Self, Self::Error> {
        if config.infrastructure.is_empty() {
            return Err(PolicyConfigError::EmptyInfrastructure);
        }
        validate_measurements("infrastructure", &config.infrastructure)?;
        let mut policy = Policy::new(&config.infrastructure);

        for register in OptionalRegister::ALL {
            let declaration = config
                .runtime_registers
                .get(register)
                .ok_or(PolicyConfigError::RegisterNotDeclared(register))?;

            match (declaration.unpinned, declaration.allowed.is_empty()) {
                (true, true) => {}
                (true, false) => return Err(PolicyConfigError::ConflictingRegister(register)),
                (false, true) => return Err(PolicyConfigError::RegisterNotDeclared(register)),
                (false, false) => {
                    validate_measurements(&register.to_string(), &declaration.allowed)?;
                    policy = policy.with_runtime_register(register, &declaration.allowed);
                }
            }
        }

        if config.integrity_log_required && config.file_hashes.is_empty() {
            return Err(PolicyConfigError::IntegrityRequiredWithoutHashes);
        }
        for (path, expected) in &config.file_hashes {
            validate_file_hash(path, expected)?;
            policy = policy.with_file_hash(path.clone(), expected);
        }

        Ok(policy.with_integrity_log_required(config.integrity_log_required))
    }
}

fn validate_measurements(field: &str, values: &[String]) -> Result<(), PolicyConfigError> {
    for value in values {
        hex_codec::decode_fixed::<MEASUREMENT_SIZE>(value).map_err(|source| {
            PolicyConfigError::InvalidMeasurement {
                field: field.to_string(),
                value: value.clone(),
                source,
            }
        })?;
    }
    Ok(())
}

fn validate_file_hash(path: &str, expected: &str) -> Result<(), PolicyConfigError> {
    let invalid = |reason: String| PolicyConfigError::InvalidFileHash {
        path: path.to_string(),
        reason,
    };

    if path.trim().is_empty() {
        return Err(invalid("path is empty".to_string()));
    }
    let parsed = ExpectedFileHash::parse(expected);
    if parsed.digest().is_empty() {
        return Err(invalid("digest is empty".to_string()));
    }
    if parsed.algorithm() == Some("") {
        return Err(invalid("algorithm tag is empty".to_string()));
    }
    hex_codec::decode(parsed.digest()).map_err(|err| invalid(err.to_string()))?;
    Ok(())
}

/// Shared, atomically replaceable policy. Readers take one [`Arc`] snapshot per verification so
/// a reload never exposes a half-updated allow-list.
#[derive(Debug)]
pub struct PolicyHandle {
    sender: watch::Sender<Arc<Policy>>,
}

impl PolicyHandle {
    pub fn new(policy: Policy) -> Self {
        let (sender, _receiver) = watch::channel(Arc::new(policy));
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Policy>> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> Arc<Policy> {
        self.sender.borrow().clone()
    }

    /// Swaps in a whole new policy.
    pub fn replace(&self, policy: Policy) {
        self.sender.send_replace(Arc::new(policy));
    }
}

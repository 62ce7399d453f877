use core::fmt;

use serde::{Serialize, Serializer};

/// A single check recorded in the verdict trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Building the report data from the freshness binding.
    Binding,
    /// Obtaining the quote from the attestation interface or the peer.
    ReportAcquisition,
    /// Reading fixed-offset fields out of the quote.
    Extraction,
    /// Comparing the quote's report data with the freshness binding digest.
    ReportData,
    Infrastructure,
    RuntimeRegister(u8),
    IntegrityLog,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Binding => f.write_str("binding"),
            Signal::ReportAcquisition => f.write_str("report_acquisition"),
            Signal::Extraction => f.write_str("extraction"),
            Signal::ReportData => f.write_str("report_data"),
            Signal::Infrastructure => f.write_str("infrastructure"),
            Signal::RuntimeRegister(index) => write!(f, "rtmr{index}"),
            Signal::IntegrityLog => f.write_str("integrity_log"),
        }
    }
}

impl Serialize for Signal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalOutcome {
    signal: Signal,
    passed: bool,
    detail: String,
}

impl SignalOutcome {
    pub fn pass(signal: Signal, detail: impl Into<String>) -> Self {
        Self {
            signal,
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(signal: Signal, detail: impl Into<String>) -> Self {
        Self {
            signal,
            passed: false,
            detail: detail.into(),
        }
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for SignalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "[{status}] {}: {}", self.signal, self.detail)
    }
}

/// Outcome of one verification attempt. `allowed` is the conjunction of every recorded
/// signal; the trail explains which signals failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    allowed: bool,
    signals: Vec<SignalOutcome>,
}

impl Verdict {
    pub fn from_signals(signals: Vec<SignalOutcome>) -> Self {
        let allowed = !signals.is_empty() && signals.iter().all(SignalOutcome::passed);
        Self { allowed, signals }
    }

    /// A denial caused by a failure before policy evaluation.
    pub fn denied(signal: Signal, detail: impl Into<String>) -> Self {
        Self::from_signals(vec![SignalOutcome::fail(signal, detail)])
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    pub fn signals(&self) -> &[SignalOutcome] {
        &self.signals
    }

    pub fn outcome(&self, signal: Signal) -> Option<&SignalOutcome> {
        self.signals.iter().find(|outcome| outcome.signal == signal)
    }

    pub fn failures(&self) -> impl Iterator<Item = &SignalOutcome> {
        self.signals.iter().filter(|outcome| !outcome.passed)
    }

    pub fn into_signals(self) -> Vec<SignalOutcome> {
        self.signals
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.signals {
            writeln!(f, "{outcome}")?;
        }
        let verdict = if self.allowed { "PASS" } else { "FAIL" };
        write!(f, "Verdict: {verdict}")
    }
}

use std::sync::Arc;

use derive_more::Constructor;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    integrity_log::{IntegrityLog, IntegrityLogSource},
    measurements::MeasurementSet,
    policy::{Candidate, IntegrityEvidence, Policy},
    quote::{Quote, QuoteError},
    report_data::{BindingError, FreshnessBinding, ReportData, ReportDataHash},
    tsm_report::{QuoteProvider, ReportClientError},
    verdict::{Signal, SignalOutcome, Verdict},
};

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("invalid freshness binding: {0}")]
    Binding(#[from] BindingError),
    #[error("failed to obtain attestation report: {0}")]
    ReportAcquisition(#[from] ReportClientError),
    #[error("failed to extract measurements: {0}")]
    Extraction(#[from] QuoteError),
    #[error("report data does not match the freshness binding: expected {expected}, found {actual}")]
    ReportDataMismatch { expected: String, actual: String },
}

impl VerificationError {
    /// The pipeline stage that failed.
    pub fn signal(&self) -> Signal {
        match self {
            Self::Binding(_) => Signal::Binding,
            Self::ReportAcquisition(_) => Signal::ReportAcquisition,
            Self::Extraction(_) => Signal::Extraction,
            Self::ReportDataMismatch { .. } => Signal::ReportData,
        }
    }
}

impl From<&VerificationError> for Verdict {
    fn from(err: &VerificationError) -> Self {
        Verdict::denied(err.signal(), err.to_string())
    }
}

/// Runs one attestation attempt end to end: bind, acquire, extract, check report data, fetch
/// the integrity log and evaluate the current policy.
#[derive(Debug, Constructor)]
pub struct Verifier<Q, L> {
    quote_provider: Q,
    integrity_log_source: L,
    policy: watch::Receiver<Arc<Policy>>,
    report_data_hash: ReportDataHash,
}

impl<Q, L> Verifier<Q, L>
where
    Q: QuoteProvider + Sync,
    L: IntegrityLogSource + Sync,
{
    /// Requests a fresh artifact bound to `binding` and evaluates it.
    pub async fn verify(&self, binding: &FreshnessBinding) -> Verdict {
        Self::into_verdict(self.try_verify(binding).await)
    }

    /// Evaluates an artifact a peer presented for `binding`.
    pub async fn verify_artifact(&self, binding: &FreshnessBinding, artifact: Vec<u8>) -> Verdict {
        Self::into_verdict(self.try_verify_artifact(binding, artifact).await)
    }

    pub async fn try_verify(&self, binding: &FreshnessBinding) -> Result<Verdict, VerificationError> {
        let expected = binding.report_data(self.report_data_hash);
        let artifact = self.quote_provider.get_quote(expected.as_ref()).await?;
        info!(artifact_len = artifact.len(), "obtained attestation report");
        self.evaluate_artifact(&expected, Quote::new(artifact)).await
    }

    pub async fn try_verify_artifact(
        &self,
        binding: &FreshnessBinding,
        artifact: Vec<u8>,
    ) -> Result<Verdict, VerificationError> {
        let expected = binding.report_data(self.report_data_hash);
        self.evaluate_artifact(&expected, Quote::new(artifact)).await
    }

    async fn evaluate_artifact(
        &self,
        expected: &ReportData,
        quote: Quote,
    ) -> Result<Verdict, VerificationError> {
        // One snapshot per attempt; a concurrent reload affects the next call only.
        let policy = Arc::clone(&self.policy.borrow());

        let measurements = MeasurementSet::extract(&quote)?;
        let embedded = quote.report_data()?;
        if embedded != *expected {
            return Err(VerificationError::ReportDataMismatch {
                expected: expected.as_hex(),
                actual: embedded.as_hex(),
            });
        }

        let integrity = if policy.checks_integrity_log() {
            match self.integrity_log_source.fetch().await {
                Ok(raw) => IntegrityEvidence::Available(IntegrityLog::parse(&raw)),
                Err(err) => {
                    warn!(?err, "integrity log unavailable");
                    IntegrityEvidence::Unavailable(err.to_string())
                }
            }
        } else {
            IntegrityEvidence::NotCollected
        };

        let evaluation = policy.evaluate(&Candidate::from(&measurements), &integrity);

        let mut signals = vec![SignalOutcome::pass(
            Signal::ReportData,
            "report data matches the freshness binding",
        )];
        signals.extend(evaluation.into_signals());
        Ok(Verdict::from_signals(signals))
    }

    fn into_verdict(result: Result<Verdict, VerificationError>) -> Verdict {
        match result {
            Ok(verdict) => {
                if verdict.allowed() {
                    info!("attestation accepted");
                } else {
                    let failed: Vec<String> =
                        verdict.failures().map(|outcome| outcome.signal().to_string()).collect();
                    warn!(?failed, "attestation rejected by policy");
                }
                verdict
            }
            Err(err) => {
                warn!(stage = %err.signal(), ?err, "attestation rejected before policy evaluation");
                Verdict::from(&err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        integrity_log::{IntegrityLogError, MockIntegrityLogSource},
        policy::{OptionalRegister, PolicyHandle},
        quote::QuoteField,
        tsm_report::MockQuoteProvider,
    };
    use assert_matches::assert_matches;
    use attestation_primitives::hash::MEASUREMENT_SIZE;

    const MRTD: [u8; MEASUREMENT_SIZE] = [0xC6; MEASUREMENT_SIZE];

    fn binding() -> FreshnessBinding {
        FreshnessBinding::new([0u8; 32], 0, [0xAA; 32])
    }

    fn artifact_for(report_data: &ReportData) -> Vec<u8> {
        let end = QuoteField::ReportData.span().unwrap().end();
        let mut bytes = vec![0u8; end + 16];
        let mrtd = QuoteField::Mrtd.span().unwrap();
        bytes[mrtd.offset..mrtd.end()].copy_from_slice(&MRTD);
        let span = QuoteField::ReportData.span().unwrap();
        bytes[span.offset..span.end()].copy_from_slice(report_data.as_ref());
        bytes
    }

    fn policy() -> Policy {
        Policy::new([hex::encode(MRTD)])
    }

    fn provider_returning(artifact: Vec<u8>) -> MockQuoteProvider {
        let mut provider = MockQuoteProvider::new();
        provider.expect_get_quote().once().returning(move |_| {
            let artifact = artifact.clone();
            Box::pin(async move { Ok(artifact) })
        });
        provider
    }

    fn unused_log_source() -> MockIntegrityLogSource {
        let mut source = MockIntegrityLogSource::new();
        source.expect_fetch().never();
        source
    }

    fn verifier<Q, L>(provider: Q, source: L, policy: Policy) -> (Verifier<Q, L>, PolicyHandle) {
        let handle = PolicyHandle::new(policy);
        let verifier = Verifier::new(provider, source, handle.subscribe(), ReportDataHash::Sha512);
        (verifier, handle)
    }

    #[tokio::test]
    async fn test_matching_artifact_is_allowed() {
        let expected = binding().report_data(ReportDataHash::Sha512);
        let mut provider = MockQuoteProvider::new();
        let artifact = artifact_for(&expected);
        provider
            .expect_get_quote()
            .once()
            .withf(move |report_data| report_data.to_vec() == expected.to_bytes().to_vec())
            .returning(move |_| {
                let artifact = artifact.clone();
                Box::pin(async move { Ok(artifact) })
            });
        let (verifier, _handle) = verifier(provider, unused_log_source(), policy());

        let verdict = verifier.verify(&binding()).await;

        assert!(verdict.allowed(), "{verdict}");
        assert_eq!(verdict.signals()[0].signal(), Signal::ReportData);
        assert_eq!(verdict.signals().len(), 6);
    }

    #[tokio::test]
    async fn test_acquisition_failure_short_circuits() {
        let mut provider = MockQuoteProvider::new();
        provider
            .expect_get_quote()
            .once()
            .returning(|_| Box::pin(async { Err(ReportClientError::EmptyReport) }));
        let (verifier, _handle) = verifier(provider, unused_log_source(), policy());

        let verdict = verifier.verify(&binding()).await;

        assert!(!verdict.allowed());
        assert_eq!(verdict.signals().len(), 1);
        assert_eq!(verdict.signals()[0].signal(), Signal::ReportAcquisition);
    }

    #[tokio::test]
    async fn test_truncated_artifact_short_circuits() {
        let (verifier, _handle) =
            verifier(provider_returning(vec![0u8; 200]), unused_log_source(), policy());

        assert_matches!(
            verifier.try_verify(&binding()).await,
            Err(VerificationError::Extraction(QuoteError::ArtifactTooSmall { .. }))
        );
    }

    #[tokio::test]
    async fn test_stale_report_data_is_rejected() {
        let stale = FreshnessBinding::new([1u8; 32], 0, [0xAA; 32]);
        let artifact = artifact_for(&stale.report_data(ReportDataHash::Sha512));
        let (verifier, _handle) =
            verifier(provider_returning(artifact), unused_log_source(), policy());

        let verdict = verifier.verify(&binding()).await;

        assert!(!verdict.allowed());
        assert_eq!(verdict.signals().len(), 1);
        assert_eq!(verdict.signals()[0].signal(), Signal::ReportData);
    }

    #[tokio::test]
    async fn test_hash_choice_must_match_binding() {
        let artifact = artifact_for(&binding().report_data(ReportDataHash::Sha384));
        let handle = PolicyHandle::new(policy());
        let verifier = Verifier::new(
            MockQuoteProvider::new(),
            unused_log_source(),
            handle.subscribe(),
            ReportDataHash::Sha512,
        );

        assert_matches!(
            verifier.try_verify_artifact(&binding(), artifact).await,
            Err(VerificationError::ReportDataMismatch { .. })
        );
    }

    #[tokio::test]
    async fn test_integrity_log_fetched_only_when_configured() {
        let artifact = artifact_for(&binding().report_data(ReportDataHash::Sha512));
        let mut source = MockIntegrityLogSource::new();
        source.expect_fetch().once().returning(|| {
            Box::pin(async {
                Ok("10 aa ima-ng sha256:AABBCC /usr/bin/app\n".to_string())
            })
        });
        let policy = policy().with_file_hash("/usr/bin/app", "sha256:aabbcc");
        let (verifier, _handle) = verifier(MockQuoteProvider::new(), source, policy);

        let verdict = verifier.verify_artifact(&binding(), artifact).await;

        assert!(verdict.allowed(), "{verdict}");
    }

    #[tokio::test]
    async fn test_unavailable_integrity_log_is_not_fatal_by_default() {
        let artifact = artifact_for(&binding().report_data(ReportDataHash::Sha512));
        let mut source = MockIntegrityLogSource::new();
        source.expect_fetch().once().returning(|| {
            Box::pin(async {
                Err(IntegrityLogError::SourceUnavailable {
                    source_name: "test".to_string(),
                    reason: "offline".to_string(),
                })
            })
        });
        let policy = policy().with_file_hash("/usr/bin/app", "aabbcc");
        let (verifier, _handle) = verifier(MockQuoteProvider::new(), source, policy);

        let verdict = verifier.verify_artifact(&binding(), artifact).await;

        assert!(verdict.allowed());
        assert!(
            verdict
                .outcome(Signal::IntegrityLog)
                .unwrap()
                .detail()
                .starts_with("not evaluated")
        );
    }

    #[tokio::test]
    async fn test_policy_reload_applies_to_next_attempt() {
        let artifact = artifact_for(&binding().report_data(ReportDataHash::Sha512));
        let (verifier, handle) = verifier(MockQuoteProvider::new(), unused_log_source(), policy());
        assert!(
            verifier
                .verify_artifact(&binding(), artifact.clone())
                .await
                .allowed()
        );

        handle.replace(
            policy().with_runtime_register(OptionalRegister::Rtmr2, [hex::encode([0x01; 48])]),
        );

        let verdict = verifier.verify_artifact(&binding(), artifact).await;
        assert!(!verdict.allowed());
        assert!(!verdict.outcome(Signal::RuntimeRegister(2)).unwrap().passed());
    }

    #[test]
    fn test_error_maps_to_single_failure() {
        let err = VerificationError::from(BindingError::InvalidInputSize {
            field: "nonce",
            expected: 32,
            actual: 31,
        });
        let verdict = Verdict::from(&err);
        assert!(!verdict.allowed());
        assert_eq!(verdict.signals()[0].signal(), Signal::Binding);
    }
}

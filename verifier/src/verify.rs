use std::path::PathBuf;

use attestation::{
    attestation::{VerificationError, Verifier},
    policy::{Policy, PolicyHandle},
    report_data::ReportDataHash,
    tsm_report::TsmReportClient,
    verdict::Verdict,
};
use serde::Serialize;
use tracing::info;

use crate::{
    cli::VerifyArgs,
    data::{self, BindingInput, IntegritySource},
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuoteOrigin {
    File { path: PathBuf },
    ConfigfsTsm { root: PathBuf },
}

#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub origin: QuoteOrigin,
    pub report_data_hash: ReportDataHash,
    /// `None` when the binding itself could not be built.
    pub expected_report_data: Option<String>,
    pub verdict: Verdict,
}

pub async fn run_verification(args: &VerifyArgs, policy: Policy) -> anyhow::Result<Verification> {
    let report_data_hash = ReportDataHash::from(args.binding.hash);
    let origin = match &args.quote {
        Some(path) => QuoteOrigin::File { path: path.clone() },
        None => QuoteOrigin::ConfigfsTsm {
            root: args.tsm_root.clone(),
        },
    };

    let binding = match BindingInput::decode(&args.binding)?.binding() {
        Ok(binding) => binding,
        Err(err) => {
            return Ok(Verification {
                origin,
                report_data_hash,
                expected_report_data: None,
                verdict: Verdict::from(&VerificationError::from(err)),
            });
        }
    };
    let expected_report_data = binding.report_data(report_data_hash).as_hex();

    let handle = PolicyHandle::new(policy);
    let verifier = Verifier::new(
        TsmReportClient::new(&args.tsm_root, args.tsm_provider.clone()),
        IntegritySource::from_args(args)?,
        handle.subscribe(),
        report_data_hash,
    );

    let verdict = match &args.quote {
        Some(path) => {
            let artifact = data::load_quote(path)?;
            info!(path = %path.display(), len = artifact.len(), "loaded quote");
            verifier.verify_artifact(&binding, artifact).await
        }
        None => verifier.verify(&binding).await,
    };

    Ok(Verification {
        origin,
        report_data_hash,
        expected_report_data: Some(expected_report_data),
        verdict,
    })
}

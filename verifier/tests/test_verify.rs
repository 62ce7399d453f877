use std::path::{Path, PathBuf};

use attestation::{
    quote::QuoteField,
    report_data::{FreshnessBinding, ReportDataHash},
    verdict::Signal,
};
use attestation_verifier::{
    cli::{BindingArgs, HashAlgorithm, OutputFormat, VerifyArgs},
    config::PolicyFile,
    output::render_text,
    verify::run_verification,
};
use rstest::rstest;

const MRTD: [u8; 48] = [0xC6; 48];

fn policy_yaml() -> String {
    format!(
        r#"
infrastructure: ["{}"]
runtime_registers:
  rtmr1: {{ unpinned: true }}
  rtmr2: {{ unpinned: true }}
  rtmr3: {{ unpinned: true }}
"#,
        hex::encode(MRTD)
    )
}

fn write_quote(dir: &Path, mrtd: [u8; 48], hash: ReportDataHash) -> PathBuf {
    let binding = FreshnessBinding::new([0u8; 32], 0, [0xAA; 32]);
    let mut bytes = vec![0u8; 1024];
    let span = QuoteField::Mrtd.span().unwrap();
    bytes[span.offset..span.end()].copy_from_slice(&mrtd);
    let span = QuoteField::ReportData.span().unwrap();
    bytes[span.offset..span.end()].copy_from_slice(binding.report_data(hash).as_ref());

    let path = dir.join("quote.bin");
    std::fs::write(&path, bytes).unwrap();
    path
}

fn verify_args(quote: PathBuf, nonce: String) -> VerifyArgs {
    VerifyArgs {
        policy: PathBuf::from("unused.yaml"),
        binding: BindingArgs {
            nonce,
            issued_at: 0,
            public_key: "aa".repeat(32),
            hash: HashAlgorithm::Sha512,
        },
        quote: Some(quote),
        tsm: false,
        tsm_root: PathBuf::from("/nonexistent"),
        tsm_provider: "tdx_guest".to_string(),
        integrity_log: None,
        integrity_log_url: None,
        output: OutputFormat::Text,
    }
}

#[rstest]
#[case(MRTD, true)]
#[case([0xC7; 48], false)]
#[tokio::test]
async fn test_verify_quote_file(#[case] mrtd: [u8; 48], #[case] allowed: bool) {
    let dir = tempfile::tempdir().unwrap();
    let quote = write_quote(dir.path(), mrtd, ReportDataHash::Sha512);
    let policy = PolicyFile::from_yaml(&policy_yaml()).unwrap();

    let verification = run_verification(&verify_args(quote, "00".repeat(32)), policy)
        .await
        .unwrap();

    assert_eq!(verification.verdict.allowed(), allowed);
    let expected_line = if allowed { "Verdict: PASS" } else { "Verdict: FAIL" };
    assert!(render_text(&verification).contains(expected_line));
}

#[tokio::test]
async fn test_wrong_hash_choice_fails_report_data() {
    let dir = tempfile::tempdir().unwrap();
    let quote = write_quote(dir.path(), MRTD, ReportDataHash::Sha384);
    let policy = PolicyFile::from_yaml(&policy_yaml()).unwrap();

    let verification = run_verification(&verify_args(quote, "00".repeat(32)), policy)
        .await
        .unwrap();

    assert!(!verification.verdict.allowed());
    assert_eq!(verification.verdict.signals()[0].signal(), Signal::ReportData);
}

#[tokio::test]
async fn test_short_nonce_is_denied_at_binding() {
    let dir = tempfile::tempdir().unwrap();
    let quote = write_quote(dir.path(), MRTD, ReportDataHash::Sha512);
    let policy = PolicyFile::from_yaml(&policy_yaml()).unwrap();

    let verification = run_verification(&verify_args(quote, "00".repeat(16)), policy)
        .await
        .unwrap();

    assert!(!verification.verdict.allowed());
    assert_eq!(verification.verdict.signals()[0].signal(), Signal::Binding);
    assert_eq!(verification.expected_report_data, None);
}

#[tokio::test]
async fn test_json_output_contains_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let quote = write_quote(dir.path(), MRTD, ReportDataHash::Sha512);
    let policy = PolicyFile::from_yaml(&policy_yaml()).unwrap();

    let verification = run_verification(&verify_args(quote.clone(), "00".repeat(32)), policy)
        .await
        .unwrap();
    let json = serde_json::to_value(&verification).unwrap();

    assert_eq!(json["verdict"]["allowed"], true);
    assert_eq!(json["origin"]["kind"], "file");
    assert_eq!(json["report_data_hash"], "sha512");
}

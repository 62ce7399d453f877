use anyhow::Context;
use attestation::policy::{OptionalRegister, Policy};

use crate::{
    cli::OutputFormat,
    verify::{QuoteOrigin, Verification},
};

pub fn print_verification(verification: &Verification, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => print!("{}", render_text(verification)),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(verification).context("failed to serialize verdict")?
        ),
    }
    Ok(())
}

pub fn render_text(verification: &Verification) -> String {
    let origin = match &verification.origin {
        QuoteOrigin::File { path } => format!("file {}", path.display()),
        QuoteOrigin::ConfigfsTsm { root } => format!("configfs-tsm {}", root.display()),
    };
    let expected = verification
        .expected_report_data
        .as_deref()
        .unwrap_or("<unavailable>");

    let mut out = String::new();
    out.push_str("=== TDX Attestation Verification ===\n\n");
    out.push_str(&format!("Quote Source:           {origin}\n"));
    out.push_str(&format!(
        "Report Data Hash:       {}\n",
        verification.report_data_hash
    ));
    out.push_str(&format!("Expected Report Data:   {expected}\n"));
    out.push_str("\n--- Signals ---\n");
    out.push_str(&verification.verdict.to_string());
    out.push('\n');
    out
}

pub fn print_policy_summary(policy: &Policy) {
    println!("=== Attestation Policy ===");
    println!();
    println!("Infrastructure (MRTD):");
    for value in policy.required_infrastructure() {
        println!("  {value}");
    }
    for register in OptionalRegister::ALL {
        let allowed = policy.runtime_allow_list(register);
        if allowed.is_empty() {
            println!("{register}: not pinned");
        } else {
            println!("{register}:");
            for value in allowed {
                println!("  {value}");
            }
        }
    }
    if policy.required_file_hashes().is_empty() {
        println!("File hashes: none");
    } else {
        let mode = if policy.integrity_log_required() {
            "required"
        } else {
            "best effort"
        };
        println!("File hashes ({mode}):");
        for (path, expected) in policy.required_file_hashes() {
            println!("  {path} {expected}");
        }
    }
}

use anyhow::{Context, bail};
use attestation_verifier::cli::{self, Cli};
use attestation_verifier::tracing::init_logging;
use attestation_verifier::{config, data, output, verify};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        cli::Command::Verify(args) => {
            let policy = config::PolicyFile::from_file(&args.policy)
                .with_context(|| format!("failed to load policy {}", args.policy.display()))?;
            let verification = verify::run_verification(&args, policy).await?;
            output::print_verification(&verification, args.output)?;
            if !verification.verdict.allowed() {
                bail!("attestation verification failed");
            }
            Ok(())
        }
        cli::Command::ReportData(args) => {
            let binding = data::BindingInput::decode(&args.binding)?
                .binding()
                .context("invalid freshness binding")?;
            println!("{}", binding.report_data(args.binding.hash.into()).as_hex());
            Ok(())
        }
        cli::Command::CheckPolicy(args) => {
            let policy = config::PolicyFile::from_file(&args.policy)
                .with_context(|| format!("failed to load policy {}", args.policy.display()))?;
            output::print_policy_summary(&policy);
            Ok(())
        }
    }
}

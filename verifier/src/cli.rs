use std::path::PathBuf;

use attestation::{
    report_data::ReportDataHash,
    tsm_report::{DEFAULT_TSM_REPORT_ROOT, TDX_GUEST_PROVIDER},
};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "attestation-verifier")]
#[command(about = "Verifies TDX attestation reports against a measurement policy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[arg(long, value_enum, env("ATTESTATION_LOG_FORMAT"), default_value = "plain")]
    pub log_format: LogFormat,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Plaintext logs
    Plain,
    /// JSON logs
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum HashAlgorithm {
    Sha512,
    Sha384,
}

impl From<HashAlgorithm> for ReportDataHash {
    fn from(hash: HashAlgorithm) -> Self {
        match hash {
            HashAlgorithm::Sha512 => ReportDataHash::Sha512,
            HashAlgorithm::Sha384 => ReportDataHash::Sha384,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Verify an attestation report against a policy
    Verify(VerifyArgs),
    /// Print the report data a peer must embed for the given freshness binding
    ReportData(ReportDataArgs),
    /// Validate a policy file and print what it allows
    CheckPolicy(CheckPolicyArgs),
}

/// Freshness material bound into the report data.
#[derive(Args, Debug, Clone)]
pub struct BindingArgs {
    /// 32-byte nonce, hex-encoded
    #[arg(long)]
    pub nonce: String,

    /// Issue time of the binding, seconds since the Unix epoch
    #[arg(long)]
    pub issued_at: u64,

    /// 32-byte ephemeral public key of the peer, hex-encoded
    #[arg(long)]
    pub public_key: String,

    /// Hash used to compress the binding into the report data
    #[arg(long, value_enum, default_value = "sha512")]
    pub hash: HashAlgorithm,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["quote", "tsm"])))]
pub struct VerifyArgs {
    /// Policy YAML file
    #[arg(long, env("ATTESTATION_POLICY"))]
    pub policy: PathBuf,

    #[command(flatten)]
    pub binding: BindingArgs,

    /// Read a quote a peer already produced from this file
    #[arg(long)]
    pub quote: Option<PathBuf>,

    /// Request a fresh quote from the local configfs-tsm interface
    #[arg(long)]
    pub tsm: bool,

    #[arg(long, env("ATTESTATION_TSM_ROOT"), default_value = DEFAULT_TSM_REPORT_ROOT)]
    pub tsm_root: PathBuf,

    /// Provider the configfs-tsm entry must report
    #[arg(long, default_value = TDX_GUEST_PROVIDER)]
    pub tsm_provider: String,

    /// Runtime integrity log file. Defaults to the kernel's IMA measurement list.
    #[arg(long, group = "integrity")]
    pub integrity_log: Option<PathBuf>,

    /// Fetch the runtime integrity log over HTTP instead
    #[arg(long, group = "integrity")]
    pub integrity_log_url: Option<Url>,

    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Args, Debug)]
pub struct ReportDataArgs {
    #[command(flatten)]
    pub binding: BindingArgs,
}

#[derive(Args, Debug)]
pub struct CheckPolicyArgs {
    /// Policy YAML file
    #[arg(long, env("ATTESTATION_POLICY"))]
    pub policy: PathBuf,
}

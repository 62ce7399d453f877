use crate::cli::LogFormat;

/// Installs the global subscriber. Filtering follows `RUST_LOG`. Logs go to stderr so stdout
/// only carries the verdict.
pub fn init_logging(log_format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    match log_format {
        LogFormat::Plain => builder.try_init().ok(),
        LogFormat::Json => builder.json().try_init().ok(),
    };
}

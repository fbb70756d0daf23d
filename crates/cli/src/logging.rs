use slideboard_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber on stderr so stdout carries only command output.
///
/// A config that fails to load falls back to the defaults here; the command
/// itself reports the config error.
pub fn init(options: &LoadOptions) {
    let logging = match AppConfig::load(options.clone()) {
        Ok(config) => config.logging,
        Err(_) => AppConfig::default().logging,
    };
    init_with(&logging);
}

pub fn init_with(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_env("SLIDEBOARD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    // Repeated initialization in one process keeps the first subscriber.
    let _ = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

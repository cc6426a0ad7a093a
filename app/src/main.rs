use std::path::Path;

use docdeck_core::config::{default_config_dir, AppConfig, ConfigError};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILTER_ENV: &str = "DOCDECK_LOG";
const LOG_FILE: &str = "docdeck.log";

fn run_app(
    load_config: impl FnOnce() -> Result<AppConfig, ConfigError>,
    run_tui: impl FnOnce(&AppConfig) -> Result<(), docdeck_tui::TuiError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    tracing::info!(
        base_url = %config.base_url,
        ui = docdeck_tui::ui_name(),
        "configuration loaded"
    );
    run_tui(&config)?;
    tracing::info!("terminal UI closed");
    Ok(())
}

fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Logs go to a file because the terminal belongs to the UI.
fn init_logging(log_dir: &Path) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;
    let appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = log_filter(std::env::var(LOG_FILTER_ENV).ok().as_deref());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|error| -> Box<dyn std::error::Error> { error })?;
    Ok(guard)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = init_logging(&default_config_dir()?)?;
    run_app(AppConfig::load_default, docdeck_tui::run)
}

use livepipe_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use livepipe_server::metrics::init_metrics;
use livepipe_server::observability::{apply_logging_level, init_tracing};
use livepipe_server::{AppState, initialize};

/// Tracks where the configuration path came from
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    CommandLine,
    Environment,
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommandLine => write!(f, "--config argument"),
            Self::Environment => write!(f, "LIVEPIPE_CONFIG environment variable"),
            Self::Default => write!(f, "default"),
        }
    }
}

fn resolve_config_path() -> (String, ConfigSource) {
    // Priority: --config argument > LIVEPIPE_CONFIG env > default
    let args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().position(|a| a == "--config")
        && let Some(path) = args.get(pos + 1)
    {
        return (path.clone(), ConfigSource::CommandLine);
    }
    if let Ok(path) = std::env::var("LIVEPIPE_CONFIG") {
        return (path, ConfigSource::Environment);
    }
    (DEFAULT_CONFIG_PATH.to_string(), ConfigSource::Default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (silently ignore if not found)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    init_tracing("info");

    let (config_path, config_source) = resolve_config_path();
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {config_path} ({config_source}): {e}");
            std::process::exit(2);
        }
    };
    tracing::info!(path = %config_path, source = %config_source, "Configuration loaded");
    apply_logging_level(&cfg.logging.level);
    init_metrics(&cfg.metrics);

    let state = AppState::build(cfg).await?;
    initialize(&state).await?;
    tracing::info!("livepipe ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    Ok(())
}

//! smoked looking-glass daemon
//!
//! Serves `POST /lg`: validates the requested target and runs mtr,
//! traceroute, ping or birdc against it, returning the tool's output.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use smoked_lg::config::{ConfigLookup, Settings, DEFAULT_CONFIG_PATH};
use smoked_lg::dispatch::Dispatcher;
use smoked_lg::executor::{ExecLimits, ProcessExecutor};
use smoked_lg::registry::Registry;
use smoked_lg::server::{self, ServerOptions};
use smoked_lg::validate::TargetValidator;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.get_string("log.level")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .compact()
        .init();

    info!("smoked looking-glass starting...");
    match settings.source() {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => warn!(
            "No config file at {DEFAULT_CONFIG_PATH}, using defaults and environment"
        ),
    }

    let registry = Registry::builtin(&settings);
    if registry.is_empty() {
        warn!("Every operation is disabled; all requests will be rejected");
    }
    info!("Operations enabled: {:?}", registry.names());

    let limits = ExecLimits::from_settings(&settings).context("Invalid exec limits")?;
    info!(
        "Exec limits: timeout={:?} max_output={:?}",
        limits.timeout, limits.max_output
    );

    let options = ServerOptions::from_settings(&settings).context("Invalid server settings")?;
    let settings = Arc::new(settings);
    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        Arc::new(TargetValidator::builtin()),
        settings,
        ProcessExecutor::new(limits),
    );
    let app = server::router(Arc::new(dispatcher), &options).context("Failed to build router")?;

    let listener = tokio::net::TcpListener::bind(options.listen)
        .await
        .with_context(|| format!("Unable to bind {}", options.listen))?;
    info!("Looking-glass listening on http://{}", options.listen);

    server::serve(listener, app)
        .await
        .context("Unable to start server")?;

    Ok(())
}

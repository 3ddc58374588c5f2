/*
corpscope - single-binary main.rs
This binary loads configuration, wires the analysis pipeline and runs the Rocket HTTP server.
*/

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use common::{Config, Credentials};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use corpscope::server::{self, AppState};
use corpscope::setup;

#[derive(Parser, Debug)]
#[command(name = "corpscope", about = "Company news analysis server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = load_config(args.config).await?;

    // Missing news/model keys stop startup; missing cache credentials only degrade.
    let credentials = match Credentials::from_env(&config) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "missing credentials");
            return Err(e);
        }
    };

    let (pipeline, cache_mode) = setup::build_pipeline(&config, &credentials)?;
    info!(
        cache = %cache_mode,
        namespaces = ?config.model.namespaces(),
        lock_ttl_secs = config.pipeline.lock_ttl().as_secs(),
        "analysis pipeline ready"
    );

    let state = AppState {
        started_at: Utc::now(),
        pipeline: Arc::new(pipeline),
        cache_mode,
    };

    info!("Launching Rocket HTTP server");
    if let Err(e) = server::launch_rocket(state, &config).await {
        error!(%e, "Rocket server failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// `config.default.toml` merged with `--config FILE` or `./config.toml`.
async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = explicit {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(default_path.as_path()) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");
    Ok(config)
}

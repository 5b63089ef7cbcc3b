//! roadd - road traffic analytics daemon
//!
//! This daemon:
//! 1. Loads the road configuration (file, env, then CLI overrides)
//! 2. Starts one worker per road
//! 3. Serves the query API until Ctrl-C, then shuts workers down

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use road_analytics::{
    api::{ApiConfig, ApiServer},
    Annotator, DaemonConfig, Orchestrator, OrchestratorOptions, RenderOptions,
};

#[derive(Parser, Debug)]
#[command(
    name = "roadd",
    about = "Count vehicles and average speeds on several road cameras at once"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "ROAD_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// API listen address
    #[arg(long, value_name = "ADDR")]
    api_addr: Option<String>,

    /// Log a status table of every road periodically
    #[arg(long)]
    show_log: bool,

    /// Publish frames without overlays
    #[arg(long)]
    no_draw: bool,

    /// Grace period for workers on shutdown
    #[arg(long, value_name = "SECS")]
    shutdown_timeout_secs: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = DaemonConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.api_addr {
        config.api_addr = addr;
    }
    if args.show_log {
        config.show_log = true;
    }
    if args.no_draw {
        config.draw = false;
    }
    if let Some(secs) = args.shutdown_timeout_secs {
        config.shutdown_timeout = Duration::from_secs(secs);
    }

    let annotator = if config.draw {
        match &config.font_path {
            Some(path) => Some(Annotator::with_font_file(path)?),
            None => {
                log::warn!("no font_path configured, overlays are drawn without labels");
                Some(Annotator::new())
            }
        }
    } else {
        None
    };
    let options = OrchestratorOptions {
        render: RenderOptions {
            annotator,
            jpeg_quality: config.jpeg_quality,
        },
        shutdown_timeout: config.shutdown_timeout,
        show_log: config.show_log,
        ..OrchestratorOptions::default()
    };

    let orchestrator = Arc::new(Orchestrator::with_options(config.streams.clone(), options)?);
    orchestrator.start()?;
    log::info!(
        "roadd running. roads: {}",
        orchestrator.list_stream_names().join(", ")
    );

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
    };
    let api_handle = match ApiServer::new(api_config, Arc::clone(&orchestrator)).spawn() {
        Ok(handle) => handle,
        Err(err) => {
            orchestrator.shutdown(config.shutdown_timeout);
            return Err(err);
        }
    };
    log::info!("road api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("roadd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping workers...");
    let report = orchestrator.shutdown(config.shutdown_timeout);
    if !report.forced.is_empty() {
        log::warn!("forced termination: {}", report.forced.join(", "));
    }
    api_handle.stop()?;
    log::info!("roadd stopped");

    Ok(())
}

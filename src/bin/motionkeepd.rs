//! motionkeepd - motion-aware frame keeper
//!
//! This daemon:
//! 1. Loads configuration (file named by MOTIONKEEP_CONFIG or --config, then env)
//! 2. Opens the frame database and frames directory
//! 3. Starts the retention sweeper and any configured streams
//! 4. Serves the HTTP API until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use motion_keep::{ApiConfig, ApiServer, FrameService, MotionKeepConfig};

#[derive(Parser, Debug)]
#[command(name = "motionkeepd", version, about = "Motion-aware frame ingestion daemon")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "MOTIONKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// API listen address; overrides the configured one.
    #[arg(long, env = "MOTIONKEEP_API_ADDR")]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = MotionKeepConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.api_addr = addr;
    }
    log::info!(
        "motionkeepd {}: db={} frames={} capacity={} retention={}s threshold={} scoring={:?}",
        env!("CARGO_PKG_VERSION"),
        config.db_path,
        config.frames_dir.display(),
        config.retention.buffer_capacity,
        config.retention.retention.as_secs(),
        config.motion.threshold,
        config.motion.scoring
    );

    let service = Arc::new(FrameService::open(&config)?);
    service.start_background()?;

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, service.clone()).spawn()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!("motionkeepd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server and background work...");
    api_handle.stop()?;
    service.shutdown()?;

    Ok(())
}

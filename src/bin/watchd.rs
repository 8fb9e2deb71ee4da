//! watchd - periodic wildlife detection daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file, `WATCH_*` env vars, CLI flags)
//! 2. Requests the detector model in the background
//! 3. Polls the camera and prints each published detection batch to stdout as
//!    one JSON line
//! 4. Stops cleanly on Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use wildlife_watch::{ControlResponse, DetectionService, ServiceState, WatchConfig};

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(author, version, about = "Poll a camera and report animals it sees")]
struct Args {
    /// JSON config file. Overrides $WATCH_CONFIG.
    #[arg(long, env = "WATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Camera base URL, e.g. http://192.168.1.40:8080
    #[arg(long, env = "WATCH_CAMERA_URL")]
    camera_url: Option<String>,

    /// Milliseconds between ticks.
    #[arg(long, env = "WATCH_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Local path of the ONNX detector.
    #[arg(long, env = "WATCH_MODEL_PATH")]
    model_path: Option<PathBuf>,

    /// Never load a model; run the heuristic only.
    #[arg(long)]
    no_model: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = WatchConfig::load_from(args.config.as_deref())?;
    if let Some(url) = args.camera_url {
        config.settings.camera_url = url;
    }
    if let Some(ms) = args.poll_interval_ms {
        config.settings.poll_interval_ms = ms;
    }
    if let Some(path) = args.model_path {
        config.model.path = path;
    }
    config
        .settings
        .validate()
        .context("invalid settings from command line")?;

    let service = DetectionService::from_config(&config);
    service.subscribe(|detections| {
        let line = serde_json::to_string(detections)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()?;
        Ok(())
    });

    if args.no_model {
        log::info!("model disabled by --no-model; heuristic detection only");
    } else if service.models().request_load() {
        log::info!("loading model {} in the background", config.model.path.display());
    }

    let started = ControlResponse::from_result(service.start(), "detection service started");
    if !started.success {
        return Err(anyhow!(started.message));
    }
    log::info!(
        "watchd running against {} every {} ms",
        config.settings.camera_url,
        config.settings.poll_interval_ms
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("watchd waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(STATUS_LOG_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let status = service.status();
                log::info!("status: {}", serde_json::to_string(&status)?);
                if status.state == ServiceState::Error {
                    log::error!(
                        "detection service halted: {}",
                        status.last_error.as_deref().unwrap_or("unknown error")
                    );
                    break;
                }
            }
        }
    }

    log::info!("shutdown signal received, stopping detection service...");
    if let Err(err) = service.stop() {
        log::warn!("{}", err);
    }
    Ok(())
}

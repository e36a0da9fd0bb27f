//! acquisitiond - streaming acquisition daemon
//!
//! This daemon:
//! 1. Opens a synthetic `stub://` camera and brings it into a known state
//! 2. Starts acquisition with a processing worker converting every frame
//! 3. Polls the relay at the display interval and logs each conversion
//! 4. Optionally simulates device reboots to exercise reconnect handling
//! 5. Shuts down in order on Ctrl-C or after `--seconds`

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use acquisition_kernel::{
    config::AcquisitionConfig, AcquisitionEngine, AcquisitionSession, PixelConverter,
    ReconnectOutcome, SyntheticCamera,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML by extension). Overrides ACQ_CONFIG.
    #[arg(long, env = "ACQ_CONFIG")]
    config: Option<PathBuf>,
    /// Run for this many seconds, then shut down. Runs until Ctrl-C when unset.
    #[arg(long)]
    seconds: Option<u64>,
    /// Simulate a device reboot every N seconds.
    #[arg(long)]
    reconnect_every: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.reconnect_every == Some(0) {
        return Err(anyhow!("--reconnect-every must be >= 1"));
    }
    let cfg = AcquisitionConfig::load_from(args.config.as_deref())?;

    let camera = SyntheticCamera::open(cfg.synthetic_config())?;
    let engine = AcquisitionEngine::open(
        Box::new(camera.clone()),
        Arc::new(camera.clone()),
        cfg.engine_options(),
    )?;
    let converter = PixelConverter::new(cfg.output_format)?;
    let session =
        AcquisitionSession::start(engine, converter, cfg.relay_policy, cfg.worker_options())?;
    let generator = camera.spawn_generator();
    log::info!(
        "acquisitiond running: {} {} at {} fps",
        cfg.camera.device,
        cfg.camera.pixel_format,
        cfg.camera.fps
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let started = Instant::now();
    let deadline = args.seconds.map(|secs| started + Duration::from_secs(secs));
    let reconnect_every = args.reconnect_every.map(Duration::from_secs);
    let mut last_reconnect = started;
    let mut displayed = 0u64;

    loop {
        match rx.recv_timeout(cfg.display_interval) {
            Ok(()) => {
                log::info!("shutdown signal received, stopping acquisition...");
                break;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        if let Some(image) = session.take_latest() {
            displayed += 1;
            log::debug!("{} | Frame ID: {}", image.describe(), image.frame_id);
        }

        if let Some(every) = reconnect_every {
            if last_reconnect.elapsed() >= every {
                last_reconnect = Instant::now();
                camera.simulate_disconnect();
                let event = camera.simulate_reconnect(ReconnectOutcome::Rebooted { roi: None });
                match session.notifier() {
                    Some(notifier) if notifier.notify(event) => {
                        log::info!("simulated device reboot");
                    }
                    _ => log::warn!("reconnect supervisor is not running"),
                }
            }
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("run time elapsed, stopping acquisition...");
            break;
        }
    }

    generator.stop();
    let stats = session.shutdown()?;
    log::info!(
        "acquisitiond stopped: displayed {}, processed {}, shed {}, incomplete {}, transform failures {}",
        displayed,
        stats.processed,
        stats.shed,
        stats.incomplete,
        stats.transform_failures
    );
    Ok(())
}

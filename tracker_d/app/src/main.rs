use anyhow::{Context, Result};
use common::{CalibrationManager, TrackerConfig};
use device::{DeviceConnector, TrackingCoordinator};
use log::{debug, error, info, trace, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracker_d::control::{get_router, ControlHost};
use tracker_d::strategies;

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

fn load_config(path: &Path) -> Result<TrackerConfig> {
    if path.exists() {
        info!("Loading config from {:?}", path);
        let file = fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config = serde_json::from_reader(reader)?;
        Ok(config)
    } else {
        info!("Config not found. Creating default at {:?}", path);
        let config = TrackerConfig::default();
        let file = fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &config)?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();

    info!("Starting...");
    debug!("Debug logging is active");
    trace!("Trace logging is active");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let config = load_config(&config_path).unwrap_or_else(|e| {
        error!("Failed to load config: {}. Using defaults.", e);
        TrackerConfig::default()
    });
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config {:?}: {}", config_path, e))?;
    info!("Loaded Config: {:?}", config);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received Ctrl-C, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl-C handler")?;

    let store = CalibrationManager::new(config.storage_dir.clone());
    let connector = DeviceConnector::new(config.transport.clone());
    let coordinator = Arc::new(TrackingCoordinator::new(
        config.clone(),
        Arc::new(connector),
        Arc::new(store),
    ));

    let sink = strategies::create_sink(&config);
    coordinator
        .start(Box::new(sink))
        .context("Failed to start output")?;
    info!("Output initialized with {:?} mode.", config.output.mode);

    if config.control.enabled {
        let router = get_router(coordinator.clone());
        let port = config.control.port;
        let advertise = config.control.advertise;
        thread::Builder::new()
            .name("control-host".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Runtime::new() {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("Failed to create Tokio runtime: {}", e);
                        return;
                    }
                };
                rt.block_on(async {
                    if let Err(e) = ControlHost::start(port, router, advertise).await {
                        error!("Control host failed: {}", e);
                    }
                });
            })
            .context("Failed to spawn control thread")?;
    }

    if config.devices.is_empty() {
        warn!("No devices configured in {:?}", config_path);
    }
    for device in &config.devices {
        let identity = device.identity();
        if let Err(e) = coordinator.connect(identity.clone()) {
            error!("✗ Failed to start session for {}: {}", identity, e);
        }
    }

    info!("Entering Main Loop...");
    let mut last_log = Instant::now();
    let mut last_forwarded = 0u64;
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));

        if last_log.elapsed() >= STATUS_LOG_INTERVAL {
            let forwarded = coordinator.forwarded();
            let rate = (forwarded - last_forwarded) as f32 / last_log.elapsed().as_secs_f32();
            info!(
                "Tracking Active: forwarded {} samples (approx {:.1}/s)",
                forwarded, rate
            );
            for device in coordinator.status().devices {
                debug!(
                    "{}: {:?}, {} frames, {} dropped, {} rejected",
                    device.role,
                    device.connection,
                    device.frames_received,
                    device.frames_dropped,
                    device.frames_rejected
                );
            }
            last_forwarded = forwarded;
            last_log = Instant::now();
        }
    }

    info!("Shutting down...");
    coordinator.shutdown();
    Ok(())
}

//! `odomap` – replay a scan log through the lidar odometry node.
//!
//! 1. Loads `odomap.toml` (defaults plus `ODOMAP_*` overrides when absent).
//! 2. Streams scans from the replay log into the scan worker while the
//!    publication gate emits maps periodically.
//! 3. On end of log or Ctrl-C, drains pending scans, publishes the final maps
//!    and optionally writes the occupancy grid as JSON.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use odomap_core::TfBuffer;
use odomap_node::config::{self, NodeConfig};
use odomap_node::{
    EventBus, LidarOdometryNode, ReplaySource, ScanSource, spawn_publisher, spawn_scan_worker,
};
use odomap_types::OdomError;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const USAGE: &str = "\
odomap - lidar odometry and occupancy mapping

USAGE:
    odomap --replay <FILE> [OPTIONS]

OPTIONS:
    -r, --replay <FILE>           JSON-lines log of static transforms and scans
    -c, --config <FILE>           Configuration file (default: odomap.toml)
        --map-out <FILE>          Write the final occupancy grid as JSON
        --publish-period <SECS>   Override map_publish_period
        --realtime                Pace playback by scan stamps
    -h, --help                    Print this help";

#[derive(Debug, PartialEq)]
struct Args {
    config: PathBuf,
    replay: PathBuf,
    map_out: Option<PathBuf>,
    publish_period: Option<f64>,
    realtime: bool,
}

enum Command {
    Run(Args),
    Help,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Command, String> {
    let mut args = args.into_iter().skip(1);
    let mut config = PathBuf::from("odomap.toml");
    let mut replay = None;
    let mut map_out = None;
    let mut publish_period = None;
    let mut realtime = false;

    while let Some(arg) = args.next() {
        let mut value = |name: &str| args.next().ok_or_else(|| format!("{name} needs a value"));
        match arg.as_str() {
            "--config" | "-c" => config = PathBuf::from(value("--config")?),
            "--replay" | "-r" => replay = Some(PathBuf::from(value("--replay")?)),
            "--map-out" => map_out = Some(PathBuf::from(value("--map-out")?)),
            "--publish-period" => {
                let raw = value("--publish-period")?;
                let secs = raw
                    .parse::<f64>()
                    .map_err(|_| format!("invalid --publish-period '{raw}'"))?;
                publish_period = Some(secs);
            }
            "--realtime" => realtime = true,
            "--help" | "-h" => return Ok(Command::Help),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    let replay = replay.ok_or_else(|| "--replay is required".to_string())?;
    Ok(Command::Run(Args {
        config,
        replay,
        map_out,
        publish_period,
        realtime,
    }))
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args()) {
        Ok(Command::Run(args)) => args,
        Ok(Command::Help) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    let _telemetry = odomap_node::telemetry::init_tracing("odomap");

    let config = match load_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; replay cannot be interrupted");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args, config, shutdown)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "odomap failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<NodeConfig, OdomError> {
    let mut cfg = match config::load_from(&args.config)? {
        Some(cfg) => {
            info!(path = %args.config.display(), "config loaded");
            cfg
        }
        None => {
            info!(path = %args.config.display(), "no config file, using defaults");
            let mut cfg = NodeConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    if let Some(period) = args.publish_period {
        cfg.map_publish_period = period;
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn run(args: Args, config: NodeConfig, shutdown: Arc<AtomicBool>) -> Result<(), OdomError> {
    let transforms = Arc::new(TfBuffer::new());
    let period = config.map_publish_interval();
    let capacity = config.scan_queue_capacity;
    let node = Arc::new(LidarOdometryNode::new(
        config,
        Arc::clone(&transforms) as Arc<dyn odomap_core::TransformSource>,
        EventBus::default(),
    )?);

    let publisher = spawn_publisher(Arc::clone(&node), period);
    let (tx, rx) = mpsc::channel(capacity);
    let worker = spawn_scan_worker(Arc::clone(&node), rx, capacity);

    let source = ReplaySource::new(&args.replay, transforms).realtime(args.realtime);
    let mut scans = source.scan_stream().await?;
    let mut submitted = 0u64;
    while let Some(scan) = scans.next().await {
        if shutdown.load(Ordering::SeqCst) {
            info!("interrupted, stopping replay");
            break;
        }
        if tx.send(scan).await.is_err() {
            warn!("scan worker stopped early");
            break;
        }
        submitted += 1;
    }
    drop(tx);

    let committed = worker
        .await
        .map_err(|e| OdomError::Channel(format!("scan worker failed: {e}")))?;
    publisher.abort();
    node.publish_maps();

    if let Some(path) = &args.map_out {
        write_map(&node, path)?;
    }

    let pose = node.current_pose();
    info!(
        submitted,
        committed,
        x = pose.pose.x,
        y = pose.pose.y,
        heading = pose.pose.heading,
        degraded = node.service().is_degraded(),
        "replay finished"
    );
    Ok(())
}

fn write_map(node: &LidarOdometryNode, path: &Path) -> Result<(), OdomError> {
    let response = node.on_get_map();
    let json = serde_json::to_string(&response)
        .map_err(|e| OdomError::Serialization(format!("failed to encode map: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| OdomError::Io(format!("failed to write map to {}: {e}", path.display())))?;
    info!(
        path = %path.display(),
        width = response.map.info.width,
        height = response.map.info.height,
        "map written"
    );
    Ok(())
}

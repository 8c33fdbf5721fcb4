use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use traffic_monitor_common::config::Config;
use traffic_monitor_common::exchange::{ExchangeError, FileReader, SnapshotReader};
use traffic_monitor_common::health::LoopHealth;
use traffic_monitor_common::snapshot::{Metrics, Snapshot, TrafficStatus};

/// What one poll prints: the consumer read contract plus loop health.
#[derive(Debug, Serialize)]
struct StatusReport {
    traffic_status: Option<TrafficStatus>,
    metrics: Option<Metrics>,
    analyzer: Option<LoopHealth>,
}

struct Args {
    config_path: PathBuf,
    watch: Option<Duration>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut config_path = PathBuf::from("config.toml");
    let mut watch = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--watch" => {
                let secs = args
                    .next()
                    .ok_or("--watch needs a number of seconds")?
                    .parse::<f64>()
                    .map_err(|e| format!("invalid --watch interval: {e}"))?;
                if !secs.is_finite() || secs <= 0.0 {
                    return Err("--watch interval must be positive".into());
                }
                watch = Some(Duration::from_secs_f64(secs));
            }
            other if other.starts_with("--") => return Err(format!("unknown option {other}")),
            path => config_path = PathBuf::from(path),
        }
    }
    Ok(Args { config_path, watch })
}

fn poll(reader: &impl SnapshotReader, health_path: &Path) -> Result<StatusReport, ExchangeError> {
    let analyzer = match LoopHealth::read(health_path) {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, "failed to read analyzer health");
            None
        }
    };
    // Both views come from one read so they always describe the same snapshot.
    let snapshot = reader.latest()?;
    Ok(StatusReport {
        traffic_status: snapshot.as_ref().map(Snapshot::traffic_status),
        metrics: snapshot.as_ref().map(Snapshot::metrics),
        analyzer,
    })
}

fn print_report(report: &StatusReport) {
    if report.traffic_status.is_none() {
        debug!("no snapshot published yet");
    }
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!(error = %e, "failed to render status report"),
    }
}

#[tokio::main]
async fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}\nusage: traffic-status [config.toml] [--watch SECS]");
            std::process::exit(2);
        }
    };

    let config = match Config::load(&args.config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", args.config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let reader = FileReader::new(&config.publish.path);
    let health_path = config.publish.health_path.clone();

    let Some(interval) = args.watch else {
        match poll(&reader, &health_path) {
            Ok(report) => print_report(&report),
            Err(e) => {
                eprintln!("failed to read snapshot: {e}");
                std::process::exit(1);
            }
        }
        return;
    };

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match poll(&reader, &health_path) {
                    Ok(report) => print_report(&report),
                    // A corrupt or unreadable file is transient from the poller's view.
                    Err(e) => warn!(error = %e, "failed to read snapshot"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

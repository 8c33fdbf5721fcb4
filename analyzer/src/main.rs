mod counter;
mod detector;
mod pipeline;
mod source;

use pipeline::{spawn_analysis, Analyzer, LoopExit, PipelineError};
use source::ffmpeg::{check_ffmpeg_available, FfmpegSource};
use std::path::PathBuf;
use tracing::{error, info};
use traffic_monitor_common::config::Config;
use traffic_monitor_common::exchange::FilePublisher;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = config.source.uri,
        width = config.source.width,
        height = config.source.height,
        snapshot = %config.publish.path.display(),
        low_threshold = config.stats.low_threshold,
        high_threshold = config.stats.high_threshold,
        "starting traffic analyzer"
    );

    check_ffmpeg_available(&config.source.ffmpeg_bin).await;

    let publisher = FilePublisher::new(&config.publish.path);
    let analyzer =
        Analyzer::new(&config, publisher).with_health_file(&config.publish.health_path);

    let source_config = config.source.clone();
    let handle = spawn_analysis(
        async move { FfmpegSource::open(&source_config).await },
        analyzer,
    );

    let stop = handle.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping analysis");
            stop.trigger();
        }
    });

    match handle.join().await {
        Ok(report) => {
            info!(
                exit = ?report.exit,
                frames = report.health.frames_processed,
                "traffic analyzer finished"
            );
            if report.exit == LoopExit::EndOfStream {
                info!("source exhausted; last snapshot remains published");
            }
        }
        Err(PipelineError::CaptureUnavailable(e)) => {
            error!(error = %e, "cannot open capture source");
            std::process::exit(2);
        }
        Err(e) => {
            error!(error = %e, "analysis loop failed");
            std::process::exit(1);
        }
    }
}

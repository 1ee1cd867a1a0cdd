use relay_client::DetectClient;
use relay_common::config::Config;
use relay_streamer::camera::HttpCamera;
use relay_streamer::session::StreamSession;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

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

    let Some(camera_config) = config.camera.clone() else {
        eprintln!("{} has no [camera] section", config_path.display());
        std::process::exit(1);
    };

    let client = match DetectClient::new(&config.server) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to create detection client");
            std::process::exit(1);
        }
    };

    info!(
        server = %client.base_url(),
        camera = camera_config.url,
        mode = ?camera_config.mode,
        interval_ms = config.stream.sample_interval_ms,
        "starting vision-relay streamer"
    );

    let mut session = StreamSession::new(
        HttpCamera::new(camera_config),
        Arc::new(client),
        &config.stream,
    );
    if let Err(e) = session.start().await {
        error!(error = %e, "failed to start stream");
        eprintln!("{}", session.notice().unwrap_or_else(|| e.user_message()));
        std::process::exit(1);
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut report = tokio::time::interval(Duration::from_secs(10));

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received, stopping stream");
                break;
            }
            _ = report.tick() => {
                let stats = session.dispatcher().stats();
                let canvas = session.canvas().lock().dimensions();
                info!(
                    streaming = session.is_streaming(),
                    tracks = session.active_tracks(),
                    sampling = session.has_active_timer(),
                    sent = stats.sent,
                    rendered = stats.rendered,
                    dropped = stats.dropped,
                    failed = stats.failed,
                    discarded = stats.discarded,
                    canvas = ?canvas,
                    "pipeline stats"
                );
            }
        }
    }

    session.stop();
}

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tryon_core::{PoseService, ScrfdLoader};

mod config;
mod dbus_interface;
mod engine;
mod feed;
mod render;
mod scheduler;
mod session;

const BUS_NAME: &str = "org.tryon.Engine1";
const OBJECT_PATH: &str = "/org/tryon/Engine1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("tryond starting");

    let config = config::Config::load()?;
    tracing::info!(
        camera = %config.camera_device,
        facing = ?config.facing_mode,
        model_dir = %config.model_dir.display(),
        detection_interval_ms = config.detection_interval.as_millis() as u64,
        refresh_hz = config.refresh_hz,
        "configuration loaded"
    );

    let loader = ScrfdLoader::new(&config.model_dir);
    if !loader.model_path().exists() {
        tracing::warn!(
            path = %loader.model_path().display(),
            "SCRFD weights missing; face tracking will use the geometric fallback"
        );
    }
    let poses = Arc::new(PoseService::new(loader, config.estimator_options()));

    let feeds = Arc::new(feed::V4lSource {
        devices: config.devices(),
        request: config.camera_request(),
    });

    let engine = engine::spawn_engine(
        engine::EngineConfig {
            refresh_interval: config.refresh_interval(),
            session: session::SessionOptions {
                detection_interval: config.detection_interval,
                smoothing_factor: config.smoothing_factor,
                placement: config.placement,
            },
        },
        feeds,
        render::HeadlessRenderer::new(),
        poses,
    )
    .context("failed to start engine")?;

    let service = dbus_interface::TryOnService {
        engine: engine.clone(),
    };
    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, system = config.system_bus, "tryond ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("tryond shutting down");
    if let Err(err) = engine.stop().await {
        tracing::debug!(error = %err, "stop during shutdown failed");
    }

    Ok(())
}

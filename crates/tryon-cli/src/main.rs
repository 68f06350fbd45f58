use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tryon_hw::Camera;

#[zbus::proxy(
    interface = "org.tryon.Engine1",
    default_service = "org.tryon.Engine1",
    default_path = "/org/tryon/Engine1"
)]
trait Engine {
    async fn start(&self, model_url: &str) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<()>;
    async fn set_placement(&self, scale: f64, x: f64, y: f64, z: f64) -> zbus::Result<String>;
    async fn retry_detector(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "tryon", about = "Virtual glasses try-on CLI")]
struct Cli {
    /// Talk to a daemon registered on the system bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a try-on session with a glasses model
    Start {
        /// Path or file:// URL of a .glb/.gltf model
        model: String,
    },
    /// Stop the running session
    Stop,
    /// Show session status
    Status,
    /// Adjust glasses placement
    Place {
        /// Size multiplier (0.5 to 1.5)
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
        /// Horizontal offset (-0.5 to 0.5)
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        x: f64,
        /// Vertical offset (-0.5 to 0.5)
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        y: f64,
        /// Depth offset (-0.5 to 0.5)
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        z: f64,
    },
    /// Retry the face landmark detector after a failure
    RetryDetector,
    /// Load a model locally and report its normalisation
    Inspect {
        model: String,
    },
    /// List V4L2 capture devices
    Devices,
}

async fn proxy(system: bool) -> Result<EngineProxy<'static>> {
    tracing::debug!(system, "connecting to tryond");
    let conn = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    EngineProxy::new(&conn).await.context("tryond is not running")
}

async fn inspect(model: &str) -> Result<()> {
    tracing::debug!(model, "loading model locally");
    let (progress, _) = tokio::sync::watch::channel(tryon_core::LoadProgress::default());
    let asset = tryon_core::asset::load(model, &progress)
        .await
        .with_context(|| format!("failed to load {model}"))?;

    tracing::debug!(bytes = asset.bytes().len(), meshes = asset.mesh_count(), "model loaded");

    let bounds = asset.bounds();
    let norm = asset.normalization();
    let normalized = asset.normalized_bounds();
    println!("model:       {}", asset.url());
    println!("size:        {} bytes", asset.bytes().len());
    println!("meshes:      {}", asset.mesh_count());
    println!("bounds:      min {:?} max {:?}", bounds.min, bounds.max);
    println!("dimensions:  {:?}", bounds.size());
    println!("offset:      {:?}", norm.offset);
    println!("scale:       {:.6}", norm.scale);
    println!("normalised:  centre {:?} max dimension {:.6}", normalized.center(), normalized.max_dimension());
    match asset.animation() {
        Some(player) => println!("animation:   {} ({:.2}s, looping)", player.clip.name, player.clip.duration),
        None => println!("animation:   none"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { model } => {
            let id = proxy(cli.system).await?.start(&model).await?;
            println!("session {id} started");
        }
        Commands::Stop => {
            proxy(cli.system).await?.stop().await?;
            println!("session stopped");
        }
        Commands::Status => {
            let status = proxy(cli.system).await?.status().await?;
            let value: serde_json::Value = serde_json::from_str(&status)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Place { scale, x, y, z } => {
            let applied = proxy(cli.system).await?.set_placement(scale, x, y, z).await?;
            println!("placement: {applied}");
        }
        Commands::RetryDetector => {
            proxy(cli.system).await?.retry_detector().await?;
            println!("detector will be retried on the next frame");
        }
        Commands::Inspect { model } => inspect(&model).await?,
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

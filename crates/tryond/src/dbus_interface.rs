use crate::engine::{EngineError, EngineHandle};
use tryon_core::types::{Offset, PlacementConfig};
use zbus::interface;

/// D-Bus interface for the try-on daemon.
///
/// Bus name: org.tryon.Engine1
/// Object path: /org/tryon/Engine1
pub struct TryOnService {
    pub engine: EngineHandle,
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    tracing::warn!(error = %err, "request failed");
    zbus::fdo::Error::Failed(err.to_string())
}

#[interface(name = "org.tryon.Engine1")]
impl TryOnService {
    /// Start a try-on session with the glasses model at `model_url`.
    /// Returns the session id.
    async fn start(&self, model_url: &str) -> zbus::fdo::Result<String> {
        tracing::info!(model_url, "start requested");
        if model_url.is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs("model_url must not be empty".into()));
        }
        let id = self.engine.start(model_url).await.map_err(to_fdo)?;
        Ok(id.to_string())
    }

    /// Stop the running session and release the camera.
    async fn stop(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop requested");
        self.engine.stop().await.map_err(to_fdo)
    }

    /// Apply manual placement. Values are clamped; the applied
    /// configuration is returned as JSON.
    async fn set_placement(&self, scale: f64, x: f64, y: f64, z: f64) -> zbus::fdo::Result<String> {
        let requested = PlacementConfig {
            scale: scale as f32,
            position: Offset {
                x: x as f32,
                y: y as f32,
                z: z as f32,
            },
        };
        let applied = self.engine.set_placement(requested).await.map_err(to_fdo)?;
        serde_json::to_string(&applied).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Forget a detector failure and try the landmark detector again.
    async fn retry_detector(&self) -> zbus::fdo::Result<()> {
        tracing::info!("detector retry requested");
        self.engine.retry_detector().await.map_err(to_fdo)
    }

    /// Return session status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        let mut json = serde_json::to_value(&status).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        if let Some(obj) = json.as_object_mut() {
            obj.insert("version".into(), env!("CARGO_PKG_VERSION").into());
        }
        Ok(json.to_string())
    }
}

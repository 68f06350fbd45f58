//! Renderer seam and the headless implementation used by the daemon.

use glam::{Mat4, Vec3};
use thiserror::Error;
use tryon_core::types::{CameraFrame, FrameSize};
use tryon_core::GlassesAsset;

pub const CAMERA_FOV_DEGREES: f32 = 50.0;
pub const CAMERA_NEAR: f32 = 0.1;
pub const CAMERA_FAR: f32 = 1000.0;
/// Camera sits on the +z axis looking toward the origin.
pub const CAMERA_DISTANCE: f32 = 2.0;

#[derive(Error, Debug, PartialEq)]
pub enum RenderError {
    #[error("renderer has been disposed")]
    Disposed,
    #[error("invalid viewport {width}x{height}")]
    InvalidViewport { width: u32, height: u32 },
    #[error("draw failed: {0}")]
    Draw(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveCamera {
    pub fov_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self {
            fov_degrees: CAMERA_FOV_DEGREES,
            aspect: 1.0,
            near: CAMERA_NEAR,
            far: CAMERA_FAR,
            position: Vec3::new(0.0, 0.0, CAMERA_DISTANCE),
        }
    }
}

impl PerspectiveCamera {
    /// Match the camera aspect to the video feed.
    pub fn fit(&mut self, size: FrameSize) {
        self.aspect = size.aspect();
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_degrees.to_radians(), self.aspect, self.near, self.far)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, Vec3::ZERO, Vec3::Y)
    }
}

/// What one draw call composites: the camera image as background and the
/// glasses, if loaded, on top.
pub struct Scene<'a> {
    pub camera: &'a PerspectiveCamera,
    pub background: Option<&'a CameraFrame>,
    pub asset: Option<&'a GlassesAsset>,
}

pub trait Renderer: Send {
    /// Set the viewport. Also re-arms a disposed renderer for a new session.
    fn resize(&mut self, size: FrameSize) -> Result<(), RenderError>;
    fn draw(&mut self, scene: &Scene<'_>) -> Result<(), RenderError>;
    /// Release every GPU-side resource. Safe to call more than once.
    fn dispose(&mut self) -> Result<(), RenderError>;
    /// Resources currently held; zero after [`Renderer::dispose`].
    fn allocated_resources(&self) -> usize;
}

/// Renderer without a display. Tracks the resources a GPU renderer would
/// hold (background texture, one buffer per mesh) and logs every draw.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    viewport: Option<FrameSize>,
    background_texture: Option<FrameSize>,
    uploaded: Option<(String, usize)>,
    frames: u64,
    disposed: bool,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn viewport(&self) -> Option<FrameSize> {
        self.viewport
    }

    #[cfg(test)]
    pub(crate) fn frames_drawn(&self) -> u64 {
        self.frames
    }

    /// URL of the asset currently uploaded.
    pub fn uploaded_asset(&self) -> Option<&str> {
        self.uploaded.as_ref().map(|(url, _)| url.as_str())
    }
}

impl Renderer for HeadlessRenderer {
    fn resize(&mut self, size: FrameSize) -> Result<(), RenderError> {
        if size.width == 0 || size.height == 0 {
            return Err(RenderError::InvalidViewport {
                width: size.width,
                height: size.height,
            });
        }
        tracing::debug!(width = size.width, height = size.height, "viewport resized");
        self.viewport = Some(size);
        self.disposed = false;
        Ok(())
    }

    fn draw(&mut self, scene: &Scene<'_>) -> Result<(), RenderError> {
        if self.disposed {
            return Err(RenderError::Disposed);
        }
        if self.viewport.is_none() {
            return Err(RenderError::Draw("no viewport".into()));
        }

        if let Some(frame) = scene.background {
            self.background_texture = Some(frame.size());
        }

        match scene.asset {
            Some(asset) => {
                if self.uploaded_asset() != Some(asset.url()) {
                    tracing::debug!(url = asset.url(), meshes = asset.mesh_count(), "uploading glasses");
                    self.uploaded = Some((asset.url().to_string(), asset.mesh_count().max(1)));
                }
                let t = asset.transform();
                let clip = scene.projection_of(asset);
                tracing::trace!(
                    frame = self.frames,
                    position = ?t.position,
                    rotation = ?t.rotation,
                    scale = t.scale,
                    clip = ?clip,
                    "draw"
                );
            }
            None => {
                self.uploaded = None;
                tracing::trace!(frame = self.frames, "draw (camera only)");
            }
        }

        self.frames += 1;
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), RenderError> {
        if !self.disposed {
            tracing::debug!(resources = self.allocated_resources(), "disposing renderer");
        }
        self.background_texture = None;
        self.uploaded = None;
        self.viewport = None;
        self.disposed = true;
        Ok(())
    }

    fn allocated_resources(&self) -> usize {
        usize::from(self.background_texture.is_some()) + self.uploaded.as_ref().map_or(0, |(_, n)| *n)
    }
}

impl Scene<'_> {
    /// Clip-space position of the asset origin.
    fn projection_of(&self, asset: &GlassesAsset) -> glam::Vec4 {
        self.camera.projection() * self.camera.view() * asset.model_matrix() * glam::Vec4::W
    }
}

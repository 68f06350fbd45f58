//! Maps the smoothed pose and user placement onto the glasses transform.

use crate::asset::GlassesAsset;
use crate::types::{PlacementConfig, SmoothedPose, Transform};
use glam::Vec3;

/// Transform for a smoothed pose under `config`. Pure.
pub fn transform_for(pose: &SmoothedPose, config: &PlacementConfig) -> Transform {
    Transform {
        position: Vec3::new(pose.x, pose.y, pose.z),
        rotation: pose.rotation.to_quat(),
        scale: pose.face_scale * config.clamped().scale,
    }
}

/// Write the placement transform onto `asset`. This is the only writer of
/// the asset transform.
pub fn place(asset: &mut GlassesAsset, pose: &SmoothedPose, config: &PlacementConfig) -> Transform {
    let transform = transform_for(pose, config);
    asset.set_transform(transform);
    transform
}

//! Shader-visible data blocks.
//!
//! Both structures must match the GLSL declarations in `shader.vert`:
//!
//! ```glsl
//! layout(set = 0, binding = 0) uniform UboViewProjection { mat4 projection; mat4 view; };
//! layout(push_constant) uniform PushModel { mat4 model; };
//! ```

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use subpass_core::CameraConfig;

/// Per-frame view and projection, one copy per swapchain image.
///
/// # Memory Layout
///
/// - Offset 0: projection matrix (64 bytes)
/// - Offset 64: view matrix (64 bytes)
/// - Total size: 128 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    pub projection: Mat4,
    pub view: Mat4,
}

impl ViewProjection {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Right-handed perspective with Y flipped into Vulkan clip space.
    pub fn new(camera: &CameraConfig, aspect: f32) -> Self {
        let mut projection = Mat4::perspective_rh(
            camera.fov_degrees.to_radians(),
            aspect,
            camera.near,
            camera.far,
        );
        projection.y_axis.y *= -1.0;

        let view = Mat4::look_at_rh(
            Vec3::from_array(camera.eye),
            Vec3::from_array(camera.target),
            Vec3::Y,
        );

        Self { projection, view }
    }
}

/// Per-draw model matrix pushed as a push constant.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PushModel {
    pub model: Mat4,
}

impl PushModel {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_match_glsl() {
        assert_eq!(ViewProjection::SIZE, 128);
        assert_eq!(PushModel::SIZE, 64);
    }

    #[test]
    fn test_projection_y_is_flipped() {
        let camera = CameraConfig::default();
        let vp = ViewProjection::new(&camera, 800.0 / 600.0);
        let unflipped = Mat4::perspective_rh(45f32.to_radians(), 800.0 / 600.0, 0.1, 100.0);

        assert!(vp.projection.y_axis.y < 0.0);
        assert!((vp.projection.y_axis.y + unflipped.y_axis.y).abs() < 1e-6);
        assert_eq!(vp.projection.x_axis, unflipped.x_axis);
    }

    #[test]
    fn test_view_looks_at_target() {
        let camera = CameraConfig::default();
        let vp = ViewProjection::new(&camera, 1.0);
        // The target sits straight ahead on -Z in view space.
        let target = vp.view.transform_point3(Vec3::from_array(camera.target));
        assert!(target.x.abs() < 1e-4);
        assert!(target.y.abs() < 1e-4);
        assert!(target.z < 0.0);
    }
}

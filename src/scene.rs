// Scene data - per-frame scene uniforms

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// GPU layout of the scene uniform buffer (std140 compatible: only mat4/vec4).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneData {
    pub view: Mat4,
    pub proj: Mat4,
    pub viewproj: Mat4,
    pub ambient_color: Vec4,
    /// xyz direction, w intensity
    pub sunlight_direction: Vec4,
    pub sunlight_color: Vec4,
}

impl Default for SceneData {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

impl SceneData {
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            view,
            proj,
            viewproj: proj * view,
            ambient_color: Vec4::splat(0.1),
            sunlight_direction: Vec4::new(0.0, 1.0, 0.5, 1.0),
            sunlight_color: Vec4::ONE,
        }
    }

    /// Camera circling the origin at `radius`, `time` seconds into the orbit.
    pub fn orbit(time: f32, aspect: f32, radius: f32) -> Self {
        let eye = Vec3::new(radius * time.cos(), radius * 0.5, radius * time.sin());
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        // Reversed depth: near maps to 1
        let mut proj = Mat4::perspective_rh(70f32.to_radians(), aspect.max(f32::EPSILON), 10_000.0, 0.1);
        // Vulkan clip space has +Y down
        proj.y_axis.y *= -1.0;
        Self::new(view, proj)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_three_matrices_and_three_vectors() {
        assert_eq!(std::mem::size_of::<SceneData>(), 3 * 64 + 3 * 16);
        assert_eq!(SceneData::default().as_bytes().len(), std::mem::size_of::<SceneData>());
    }

    #[test]
    fn viewproj_is_proj_times_view() {
        let scene = SceneData::orbit(0.3, 16.0 / 9.0, 5.0);
        assert!(scene.viewproj.abs_diff_eq(scene.proj * scene.view, 1e-5));
    }
}

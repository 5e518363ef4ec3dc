use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Scene-wide matrices written into the vertex-stage uniform each frame.
/// Layout matches the `SceneUniform` block in `shaders/scene.vert`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct SceneUniform {
    pub view: Mat4,
    pub proj: Mat4,
    pub model: Mat4,
}

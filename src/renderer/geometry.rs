use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::renderer::context::RenderContext;
use crate::renderer::error::RenderResult;
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::resources::upload::TransferContext;
use crate::renderer::scene::{Scene, Vertex};

/// Device-local vertex and index buffers holding the merged scene
/// geometry. Buffers are reused in place while the merged byte sizes stay
/// the same and reallocated when they change.
#[derive(Default)]
pub struct GeometryBuffers {
    vertex: Option<Buffer>,
    index: Option<Buffer>,
    index_count: u32,
}

impl GeometryBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_buffer(&self) -> Option<vk::Buffer> {
        self.vertex.as_ref().map(|buffer| buffer.handle)
    }

    pub fn index_buffer(&self) -> Option<vk::Buffer> {
        self.index.as_ref().map(|buffer| buffer.handle)
    }

    /// Total indices to draw; zero while the scene is empty.
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Whether refreshing from `scene` would need differently sized
    /// buffers. A true result means recorded command buffers would go
    /// stale, so the refresh has to run inside a display rebuild.
    pub fn capacity_differs(&self, scene: &Scene) -> bool {
        let (vertex_bytes, index_bytes) = required_bytes(scene);
        vertex_bytes != self.vertex.as_ref().map_or(0, |buffer| buffer.size)
            || index_bytes != self.index.as_ref().map_or(0, |buffer| buffer.size)
    }

    /// Re-merges the scene and pushes the result to the device. Does
    /// nothing while the scene is clean. The dirty flag is cleared only
    /// once both copies have completed on the GPU.
    pub fn refresh(
        &mut self,
        ctx: &RenderContext,
        upload: &TransferContext,
        scene: &mut Scene,
    ) -> RenderResult<()> {
        if !scene.is_dirty() {
            return Ok(());
        }

        let merged = scene.merge();
        if merged.vertices.is_empty() {
            self.vertex = None;
            self.index = None;
            self.index_count = 0;
            scene.clear_dirty();
            return Ok(());
        }

        upload_into(
            &mut self.vertex,
            ctx,
            upload,
            "Merged vertex buffer",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            merged.vertex_bytes(),
        )?;
        upload_into(
            &mut self.index,
            ctx,
            upload,
            "Merged index buffer",
            vk::BufferUsageFlags::INDEX_BUFFER,
            merged.index_bytes(),
        )?;

        self.index_count = merged.indices.len() as u32;
        scene.clear_dirty();
        Ok(())
    }
}

fn required_bytes(scene: &Scene) -> (u64, u64) {
    (
        (scene.vertex_count() * std::mem::size_of::<Vertex>()) as u64,
        (scene.index_count() * std::mem::size_of::<u32>()) as u64,
    )
}

/// Stages `bytes` and copies them into the device-local buffer in `slot`,
/// reallocating it first if its size no longer matches.
fn upload_into(
    slot: &mut Option<Buffer>,
    ctx: &RenderContext,
    upload: &TransferContext,
    name: &str,
    usage: vk::BufferUsageFlags,
    bytes: &[u8],
) -> RenderResult<()> {
    let size = bytes.len() as u64;
    if slot.as_ref().is_some_and(|buffer| buffer.size != size) {
        *slot = None;
    }
    let target = match slot {
        Some(buffer) => buffer.handle,
        None => {
            log::debug!("Allocating {name}: {size} bytes");
            let buffer = Buffer::new(
                ctx,
                name,
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryLocation::GpuOnly,
            )?;
            let handle = buffer.handle;
            *slot = Some(buffer);
            handle
        }
    };

    let staging = Buffer::staging(ctx, "Geometry staging buffer", bytes)?;
    upload.copy_buffer(staging.handle, target, size)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::scene::{Mesh, Motion, Transform};
    use glam::{Vec2, Vec3};

    #[test]
    fn empty_scene_needs_no_capacity() {
        let buffers = GeometryBuffers::new();
        let scene = Scene::new();
        assert!(!buffers.capacity_differs(&scene));
    }

    #[test]
    fn unallocated_buffers_differ_from_populated_scene() {
        let buffers = GeometryBuffers::new();
        let mut scene = Scene::new();
        scene.register_object(
            Mesh::pane(Vec2::ONE, Vec3::ONE),
            Transform::default(),
            Motion::Static,
        );
        assert!(buffers.capacity_differs(&scene));
    }

    #[test]
    fn required_bytes_track_scene_totals() {
        let mut scene = Scene::new();
        scene.register_object(
            Mesh::pane(Vec2::ONE, Vec3::ONE),
            Transform::default(),
            Motion::Static,
        );
        scene.register_object(
            Mesh::triangle(Vec3::ONE),
            Transform::default(),
            Motion::Static,
        );

        let (vertex_bytes, index_bytes) = required_bytes(&scene);
        assert_eq!(
            vertex_bytes,
            (7 * std::mem::size_of::<Vertex>()) as u64
        );
        assert_eq!(index_bytes, (9 * std::mem::size_of::<u32>()) as u64);
    }
}

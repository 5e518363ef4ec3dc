use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec2, Vec3};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, position) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, color) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, uv) as u32),
        ]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn triangle(color: Vec3) -> Self {
        Self {
            vertices: vec![
                Vertex {
                    position: Vec3::new(0.0, 1.0, 0.0),
                    color,
                    uv: Vec2::new(0.5, 0.0),
                },
                Vertex {
                    position: Vec3::new(-1.0, -1.0, 0.0),
                    color,
                    uv: Vec2::new(0.0, 1.0),
                },
                Vertex {
                    position: Vec3::new(1.0, -1.0, 0.0),
                    color,
                    uv: Vec2::new(1.0, 1.0),
                },
            ],
            indices: vec![0, 1, 2],
        }
    }

    /// An axis-aligned quad in the XY plane with its corner at the origin,
    /// drawn as two triangles.
    pub fn pane(size: Vec2, color: Vec3) -> Self {
        Self {
            vertices: vec![
                Vertex {
                    position: Vec3::ZERO,
                    color,
                    uv: Vec2::new(0.0, 0.0),
                },
                Vertex {
                    position: Vec3::new(size.x, 0.0, 0.0),
                    color,
                    uv: Vec2::new(1.0, 0.0),
                },
                Vertex {
                    position: Vec3::new(0.0, size.y, 0.0),
                    color,
                    uv: Vec2::new(0.0, 1.0),
                },
                Vertex {
                    position: Vec3::new(size.x, size.y, 0.0),
                    color,
                    uv: Vec2::new(1.0, 1.0),
                },
            ],
            indices: vec![0, 1, 2, 1, 2, 3],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::from_translation(Vec3::ZERO)
    }
}

/// How an entity is expected to move. The renderer only stores the tag;
/// integration is up to the caller driving the scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Motion {
    /// Never moves after registration.
    Static,
    /// Moves on its own every tick.
    Dynamic { velocity: Vec3, acceleration: Vec3 },
    /// Moves only when explicitly repositioned.
    Kinematic,
}

#[derive(Clone, Debug)]
pub struct Entity {
    pub mesh: Mesh,
    pub transform: Transform,
    pub motion: Motion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityId(u32);

/// Vertex and index data for every registered entity, flattened into the
/// two arrays the geometry buffers consume.
pub struct MergedGeometry {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MergedGeometry {
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Registry of renderable entities. Any mutation marks the scene dirty;
/// the flag stays set until the geometry buffers have been refreshed on
/// the device.
#[derive(Default)]
pub struct Scene {
    entities: Vec<(EntityId, Entity)>,
    next_id: u32,
    dirty: bool,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_object(&mut self, mesh: Mesh, transform: Transform, motion: Motion) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.entities.push((
            id,
            Entity {
                mesh,
                transform,
                motion,
            },
        ));
        self.dirty = true;
        id
    }

    pub fn remove_object(&mut self, id: EntityId) -> bool {
        let before = self.entities.len();
        self.entities.retain(|(entity_id, _)| *entity_id != id);
        let removed = self.entities.len() != before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Repositions an entity. A transform identical to the current one is
    /// a no-op and leaves the dirty flag untouched.
    pub fn set_transform(&mut self, id: EntityId, transform: Transform) -> bool {
        let Some(entity) = self.lookup_mut(id) else {
            return false;
        };
        if entity.transform != transform {
            entity.transform = transform;
            self.dirty = true;
        }
        true
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|(entity_id, _)| *entity_id == id)
            .map(|(_, entity)| entity)
    }

    /// Mutable access marks the scene dirty since writes cannot be tracked.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.dirty = true;
        self.lookup_mut(id)
    }

    fn lookup_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities
            .iter_mut()
            .find(|(entity_id, _)| *entity_id == id)
            .map(|(_, entity)| entity)
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn vertex_count(&self) -> usize {
        self.entities
            .iter()
            .map(|(_, entity)| entity.mesh.vertices.len())
            .sum()
    }

    pub fn index_count(&self) -> usize {
        self.entities
            .iter()
            .map(|(_, entity)| entity.mesh.indices.len())
            .sum()
    }

    /// Flattens every entity into one vertex and one index array, in
    /// registration order. Transforms are baked into the vertex positions
    /// and each entity's indices are offset by the number of vertices
    /// merged before it.
    pub fn merge(&self) -> MergedGeometry {
        let mut vertices = Vec::with_capacity(self.vertex_count());
        let mut indices = Vec::with_capacity(self.index_count());
        let mut base = 0u32;
        for (_, entity) in &self.entities {
            let model = entity.transform.matrix();
            vertices.extend(entity.mesh.vertices.iter().map(|vertex| Vertex {
                position: model.transform_point3(vertex.position),
                ..*vertex
            }));
            indices.extend(entity.mesh.indices.iter().map(|index| index + base));
            base += entity.mesh.vertices.len() as u32;
        }
        MergedGeometry { vertices, indices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_mesh() -> Mesh {
        Mesh {
            vertices: vec![Vertex::default(); 4],
            indices: vec![0, 1, 2, 3],
        }
    }

    #[test]
    fn merge_offsets_indices_by_preceding_vertex_count() {
        let mut scene = Scene::new();
        scene.register_object(Mesh::triangle(Vec3::ONE), Transform::default(), Motion::Static);
        scene.register_object(quad_mesh(), Transform::default(), Motion::Static);

        let merged = scene.merge();
        assert_eq!(merged.vertices.len(), 7);
        assert_eq!(merged.indices, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn merge_bakes_transforms_into_positions() {
        let mut scene = Scene::new();
        scene.register_object(
            Mesh::pane(Vec2::new(1.0, 1.0), Vec3::ONE),
            Transform::from_translation(Vec3::new(0.0, 0.0, 2.0)),
            Motion::Static,
        );

        let merged = scene.merge();
        assert!(merged
            .vertices
            .iter()
            .all(|vertex| (vertex.position.z - 2.0).abs() < f32::EPSILON));
    }

    #[test]
    fn merge_preserves_registration_order() {
        let mut scene = Scene::new();
        scene.register_object(
            Mesh::pane(Vec2::ONE, Vec3::new(1.0, 0.0, 0.0)),
            Transform::default(),
            Motion::Static,
        );
        scene.register_object(
            Mesh::pane(Vec2::ONE, Vec3::new(0.0, 1.0, 0.0)),
            Transform::default(),
            Motion::Static,
        );

        let merged = scene.merge();
        assert_eq!(merged.vertices[0].color, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(merged.vertices[4].color, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn pane_uses_two_shared_triangles() {
        let pane = Mesh::pane(Vec2::new(2.0, 3.0), Vec3::ONE);
        assert_eq!(pane.vertices.len(), 4);
        assert_eq!(pane.indices, vec![0, 1, 2, 1, 2, 3]);
        assert_eq!(pane.vertices[3].position, Vec3::new(2.0, 3.0, 0.0));
    }

    #[test]
    fn mutations_mark_the_scene_dirty() {
        let mut scene = Scene::new();
        assert!(!scene.is_dirty());

        let id = scene.register_object(quad_mesh(), Transform::default(), Motion::Kinematic);
        assert!(scene.is_dirty());
        scene.clear_dirty();

        // Re-applying the current transform is not a mutation.
        assert!(scene.set_transform(id, Transform::default()));
        assert!(!scene.is_dirty());

        assert!(scene.set_transform(
            id,
            Transform::from_translation(Vec3::new(1.0, 0.0, 0.0))
        ));
        assert!(scene.is_dirty());
        scene.clear_dirty();

        assert!(scene.remove_object(id));
        assert!(scene.is_dirty());
        scene.clear_dirty();

        assert!(!scene.remove_object(id));
        assert!(!scene.is_dirty());
    }

    #[test]
    fn ids_stay_unique_after_removal() {
        let mut scene = Scene::new();
        let first = scene.register_object(quad_mesh(), Transform::default(), Motion::Static);
        scene.remove_object(first);
        let second = scene.register_object(quad_mesh(), Transform::default(), Motion::Static);
        assert_ne!(first, second);
    }
}

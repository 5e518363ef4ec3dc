use std::marker::PhantomData;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use smallvec::SmallVec;

use crate::renderer::context::RenderContext;
use crate::renderer::error::{RenderError, RenderResult};
use crate::renderer::resources::buffer::Buffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ResourceKind {
    Uniform,
    Storage,
}

impl ResourceKind {
    fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::Uniform => vk::DescriptorType::UNIFORM_BUFFER,
            Self::Storage => vk::DescriptorType::STORAGE_BUFFER,
        }
    }

    fn buffer_usage(self) -> vk::BufferUsageFlags {
        match self {
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Storage => "storage",
        }
    }
}

#[derive(Clone, Debug)]
struct DescriptorRecord {
    binding: u32,
    kind: ResourceKind,
    stages: vk::ShaderStageFlags,
    element_size: u64,
    capacity: u64,
}

impl DescriptorRecord {
    fn payload_size(&self) -> u64 {
        self.element_size * self.capacity
    }
}

/// Registration ledger behind the registry. Slots are handed out in
/// registration order and freeze once the layout is finalized.
#[derive(Default)]
struct BindingTable {
    records: Vec<DescriptorRecord>,
    finalized: bool,
}

impl BindingTable {
    fn register(
        &mut self,
        kind: ResourceKind,
        stages: vk::ShaderStageFlags,
        element_size: u64,
        capacity: u64,
    ) -> RenderResult<u32> {
        if self.finalized {
            return Err(RenderError::LayoutAlreadyFinalized);
        }
        let binding = self.records.len() as u32;
        self.records.push(DescriptorRecord {
            binding,
            kind,
            stages,
            element_size,
            capacity,
        });
        Ok(binding)
    }

    fn finalize(&mut self) -> RenderResult<()> {
        if self.finalized {
            return Err(RenderError::LayoutAlreadyFinalized);
        }
        self.finalized = true;
        Ok(())
    }

    fn layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.records
            .iter()
            .map(|record| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(record.binding)
                    .descriptor_type(record.kind.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(record.stages)
            })
            .collect()
    }

    /// One pool size per record, each sized for every presentation image.
    fn pool_sizes(&self, image_count: u32) -> Vec<vk::DescriptorPoolSize> {
        self.records
            .iter()
            .map(|record| vk::DescriptorPoolSize {
                ty: record.kind.descriptor_type(),
                descriptor_count: image_count,
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Typed key for a single-value resource registered with the registry.
#[derive(Clone, Copy, Debug)]
pub struct UniformHandle<T> {
    slot: u32,
    _marker: PhantomData<T>,
}

/// Typed key for a fixed-capacity array resource.
#[derive(Clone, Copy, Debug)]
pub struct ArrayHandle<T> {
    slot: u32,
    _marker: PhantomData<T>,
}

/// Owns the descriptor set layout, per-image backing buffers, and the
/// descriptor pool and sets that tie them together.
///
/// Registration happens before the layout is finalized; per-image storage
/// and descriptor sets are rebuilt from the frozen table every time the
/// presentation image count changes.
pub struct BindingRegistry {
    table: BindingTable,
    layout: Option<vk::DescriptorSetLayout>,
    pool: Option<vk::DescriptorPool>,
    sets: Vec<vk::DescriptorSet>,
    storage: Vec<Vec<Buffer>>,
    device: Arc<ash::Device>,
}

impl BindingRegistry {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            table: BindingTable::default(),
            layout: None,
            pool: None,
            sets: Vec::new(),
            storage: Vec::new(),
            device,
        }
    }

    pub fn register_uniform<T: Pod>(
        &mut self,
        stages: vk::ShaderStageFlags,
    ) -> RenderResult<UniformHandle<T>> {
        let slot = self.table.register(
            ResourceKind::Uniform,
            stages,
            std::mem::size_of::<T>() as u64,
            1,
        )?;
        log::debug!("Registered uniform at binding {slot}");
        Ok(UniformHandle {
            slot,
            _marker: PhantomData,
        })
    }

    pub fn register_array<T: Pod>(
        &mut self,
        stages: vk::ShaderStageFlags,
        capacity: u64,
    ) -> RenderResult<ArrayHandle<T>> {
        let slot = self.table.register(
            ResourceKind::Storage,
            stages,
            std::mem::size_of::<T>() as u64,
            capacity,
        )?;
        log::debug!("Registered array of {capacity} at binding {slot}");
        Ok(ArrayHandle {
            slot,
            _marker: PhantomData,
        })
    }

    /// Freezes the table and creates the descriptor set layout. Further
    /// registrations are rejected from here on.
    pub fn finalize_layout(&mut self) -> RenderResult<()> {
        self.table.finalize()?;
        let bindings = self.table.layout_bindings();
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        self.layout = Some(unsafe { self.device.create_descriptor_set_layout(&info, None)? });
        log::debug!("Binding layout finalized with {} slots", self.table.len());
        Ok(())
    }

    pub fn layout(&self) -> RenderResult<vk::DescriptorSetLayout> {
        self.layout.ok_or(RenderError::LayoutNotFinalized)
    }

    /// Allocates one host-visible backing buffer per registered resource
    /// per presentation image.
    pub fn prepare_per_image_storage(
        &mut self,
        ctx: &RenderContext,
        image_count: u32,
    ) -> RenderResult<()> {
        self.storage.clear();
        for record in &self.table.records {
            let mut per_image = Vec::with_capacity(image_count as usize);
            for image in 0..image_count {
                per_image.push(Buffer::new(
                    ctx,
                    &format!("{} binding {} image {image}", record.kind.label(), record.binding),
                    record.payload_size(),
                    record.kind.buffer_usage(),
                    MemoryLocation::CpuToGpu,
                )?);
            }
            self.storage.push(per_image);
        }
        Ok(())
    }

    /// Creates the descriptor pool sized for exactly this generation,
    /// allocates one set per presentation image, and points every binding
    /// at its backing buffer. Writes are applied as one batch per image.
    pub fn build_sets(&mut self, image_count: u32) -> RenderResult<()> {
        let layout = self.layout()?;
        if self.table.is_empty() {
            return Ok(());
        }

        let pool = {
            let sizes = self.table.pool_sizes(image_count);
            let info = vk::DescriptorPoolCreateInfo::default()
                .pool_sizes(&sizes)
                .max_sets(image_count);
            unsafe { self.device.create_descriptor_pool(&info, None)? }
        };
        self.pool = Some(pool);

        let layouts = vec![layout; image_count as usize];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        self.sets = unsafe { self.device.allocate_descriptor_sets(&info)? };

        for (image, set) in self.sets.iter().enumerate() {
            let infos: Vec<vk::DescriptorBufferInfo> = self
                .table
                .records
                .iter()
                .enumerate()
                .map(|(slot, record)| vk::DescriptorBufferInfo {
                    buffer: self.storage[slot][image].handle,
                    offset: 0,
                    range: record.payload_size(),
                })
                .collect();
            let writes: SmallVec<[vk::WriteDescriptorSet; 4]> = self
                .table
                .records
                .iter()
                .zip(&infos)
                .map(|(record, info)| {
                    vk::WriteDescriptorSet::default()
                        .dst_set(*set)
                        .dst_binding(record.binding)
                        .dst_array_element(0)
                        .descriptor_type(record.kind.descriptor_type())
                        .buffer_info(std::slice::from_ref(info))
                })
                .collect();
            unsafe {
                self.device.update_descriptor_sets(&writes, &[]);
            }
        }

        Ok(())
    }

    /// Tears down the pool, sets, and backing buffers of the current
    /// generation. The layout and table survive for the next build.
    pub fn release_per_image_storage(&mut self) {
        if let Some(pool) = self.pool.take() {
            unsafe {
                self.device.destroy_descriptor_pool(pool, None);
            }
        }
        self.sets.clear();
        self.storage.clear();
    }

    pub fn set_for_image(&self, image_index: u32) -> Option<vk::DescriptorSet> {
        self.sets.get(image_index as usize).copied()
    }

    pub fn write_uniform<T: Pod>(
        &mut self,
        handle: &UniformHandle<T>,
        image_index: u32,
        value: &T,
    ) -> RenderResult<()> {
        self.write_slot(handle.slot, image_index, bytemuck::bytes_of(value))
    }

    pub fn write_array<T: Pod>(
        &mut self,
        handle: &ArrayHandle<T>,
        image_index: u32,
        values: &[T],
    ) -> RenderResult<()> {
        self.write_slot(handle.slot, image_index, bytemuck::cast_slice(values))
    }

    fn write_slot(&mut self, slot: u32, image_index: u32, bytes: &[u8]) -> RenderResult<()> {
        let declared = self.table.records[slot as usize].payload_size();
        if bytes.len() as u64 > declared {
            return Err(RenderError::ResourceSizeMismatch {
                declared,
                got: bytes.len() as u64,
            });
        }

        let per_image = self
            .storage
            .get_mut(slot as usize)
            .ok_or(RenderError::ImageIndexOutOfRange {
                index: image_index,
                count: 0,
            })?;
        let count = per_image.len() as u32;
        let buffer = per_image
            .get_mut(image_index as usize)
            .ok_or(RenderError::ImageIndexOutOfRange {
                index: image_index,
                count,
            })?;
        buffer.write_bytes(bytes, 0)
    }
}

impl Drop for BindingRegistry {
    fn drop(&mut self) {
        self.release_per_image_storage();
        if let Some(layout) = self.layout.take() {
            unsafe {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_follow_registration_order() {
        let mut table = BindingTable::default();
        let first = table
            .register(ResourceKind::Uniform, vk::ShaderStageFlags::VERTEX, 192, 1)
            .unwrap();
        let second = table
            .register(ResourceKind::Storage, vk::ShaderStageFlags::VERTEX, 64, 16)
            .unwrap();
        let third = table
            .register(ResourceKind::Uniform, vk::ShaderStageFlags::FRAGMENT, 16, 1)
            .unwrap();
        assert_eq!([first, second, third], [0, 1, 2]);

        let bindings = table.layout_bindings();
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[2].binding, 2);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::STORAGE_BUFFER
        );
        assert_eq!(bindings[2].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn registration_after_finalize_is_rejected() {
        let mut table = BindingTable::default();
        table
            .register(ResourceKind::Uniform, vk::ShaderStageFlags::VERTEX, 192, 1)
            .unwrap();
        table.finalize().unwrap();

        let err = table
            .register(ResourceKind::Storage, vk::ShaderStageFlags::VERTEX, 64, 8)
            .unwrap_err();
        assert!(matches!(err, RenderError::LayoutAlreadyFinalized));
    }

    #[test]
    fn finalize_happens_once() {
        let mut table = BindingTable::default();
        table.finalize().unwrap();
        assert!(matches!(
            table.finalize(),
            Err(RenderError::LayoutAlreadyFinalized)
        ));
    }

    #[test]
    fn pool_sizes_cover_every_image() {
        let mut table = BindingTable::default();
        table
            .register(ResourceKind::Uniform, vk::ShaderStageFlags::VERTEX, 192, 1)
            .unwrap();
        table
            .register(ResourceKind::Storage, vk::ShaderStageFlags::VERTEX, 64, 32)
            .unwrap();

        let sizes = table.pool_sizes(3);
        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|size| size.descriptor_count == 3));
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[1].ty, vk::DescriptorType::STORAGE_BUFFER);
    }

    #[test]
    fn array_payload_spans_full_capacity() {
        let record = DescriptorRecord {
            binding: 0,
            kind: ResourceKind::Storage,
            stages: vk::ShaderStageFlags::VERTEX,
            element_size: 64,
            capacity: 10,
        };
        assert_eq!(record.payload_size(), 640);
    }
}

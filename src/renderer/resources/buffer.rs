use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;

use crate::renderer::context::RenderContext;
use crate::renderer::error::{RenderError, RenderResult};

/// A Vulkan buffer bound to its own allocation. The allocation is returned
/// to the allocator and the buffer destroyed on drop, whichever way the
/// owning scope exits.
pub struct Buffer {
    pub handle: vk::Buffer,
    pub size: u64,

    allocation: Option<Allocation>,
    allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Buffer {
    pub fn new(
        ctx: &RenderContext,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<Self> {
        let device = Arc::clone(&ctx.device);
        let allocator = ctx.allocator();

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = unsafe { device.create_buffer(&buffer_info, None)? };

        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };
        let allocation = allocator
            .lock()
            .map_err(|_| RenderError::AllocatorPoisoned)?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?;

        unsafe {
            device.bind_buffer_memory(handle, allocation.memory(), allocation.offset())?;
        }

        Ok(Self {
            handle,
            size,
            allocation: Some(allocation),
            allocator,
            device,
        })
    }

    /// Creates a host-visible staging buffer pre-filled with `bytes`.
    pub fn staging(ctx: &RenderContext, name: &str, bytes: &[u8]) -> RenderResult<Self> {
        let mut buffer = Self::new(
            ctx,
            name,
            bytes.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write_bytes(bytes, 0)?;
        Ok(buffer)
    }

    /// Copies `bytes` into the mapped allocation at byte `offset`. Fails on
    /// buffers whose memory is not host-visible.
    pub fn write_bytes(&mut self, bytes: &[u8], offset: usize) -> RenderResult<()> {
        if offset as u64 + bytes.len() as u64 > self.size {
            return Err(RenderError::WriteTooLarge {
                size: bytes.len() as u64,
                capacity: self.size,
            });
        }

        let allocation = self
            .allocation
            .as_mut()
            .ok_or(RenderError::NotHostVisible)?;
        let mut slab = allocation
            .try_as_mapped_slab()
            .ok_or(RenderError::NotHostVisible)?;
        presser::copy_from_slice_to_offset(bytes, &mut slab, offset)?;

        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Ok(mut allocator) = self.allocator.lock() {
                if let Err(err) = allocator.free(allocation) {
                    log::error!("Failed to free buffer allocation: {err}");
                }
            }
        }
        unsafe {
            self.device.destroy_buffer(self.handle, None);
        }
    }
}

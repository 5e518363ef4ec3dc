use std::sync::Arc;

use ash::vk;

use crate::renderer::error::RenderResult;
use crate::renderer::resources::image;

/// One-shot command submission for CPU-to-GPU copies and layout
/// transitions. Every submission blocks until the device signals the
/// fence, so callers can rely on the transfer being complete on return.
pub struct TransferContext {
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    fence: vk::Fence,
    device: Arc<ash::Device>,
}

impl TransferContext {
    pub fn new(
        device: Arc<ash::Device>,
        queue: vk::Queue,
        queue_family_index: u32,
    ) -> RenderResult<Self> {
        let command_pool = {
            let info = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family_index);
            unsafe { device.create_command_pool(&info, None)? }
        };
        let fence = {
            let info = vk::FenceCreateInfo::default();
            unsafe { device.create_fence(&info, None)? }
        };

        Ok(Self {
            queue,
            command_pool,
            fence,
            device,
        })
    }

    /// Records commands through `record`, submits them, and waits for the
    /// submission to finish before returning.
    pub fn immediate_submit<F>(&self, record: F) -> RenderResult<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> RenderResult<()>,
    {
        let cmd = {
            let info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            unsafe { self.device.allocate_command_buffers(&info)?[0] }
        };

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.begin_command_buffer(cmd, &begin_info)?;
        }

        if let Err(err) = record(cmd, &self.device) {
            unsafe {
                self.device
                    .reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())?;
            }
            return Err(err);
        }

        unsafe {
            self.device.end_command_buffer(cmd)?;

            let cmds = [cmd];
            let submit = vk::SubmitInfo::default().command_buffers(&cmds);
            self.device
                .queue_submit(self.queue, &[submit], self.fence)?;

            self.device.wait_for_fences(&[self.fence], true, u64::MAX)?;
            self.device.reset_fences(&[self.fence])?;
            self.device
                .reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())?;
        }

        Ok(())
    }

    /// Copies `size` bytes between buffers and waits for completion.
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: u64) -> RenderResult<()> {
        self.immediate_submit(|cmd, device| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe {
                device.cmd_copy_buffer(cmd, src, dst, &[region]);
            }
            Ok(())
        })
    }

    /// Moves an image between layouts. The pair is validated against the
    /// supported transition table before anything is recorded.
    pub fn transition_image(
        &self,
        target: vk::Image,
        format: vk::Format,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> RenderResult<()> {
        let masks = image::transition_masks(old_layout, new_layout)?;
        self.immediate_submit(|cmd, device| {
            image::record_layout_transition(
                device, cmd, target, format, old_layout, new_layout, masks,
            );
            Ok(())
        })
    }
}

impl Drop for TransferContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_fence(self.fence, None);
        }
    }
}

pub mod config;
pub mod error;
pub mod scene;
pub mod shader;
pub mod shader_data;

mod bindings;
mod context;
mod device;
mod display;
mod frames;
mod geometry;
mod pipeline;
mod resources;
mod swapchain;

use ash::vk;
use bytemuck::Pod;
use winit::window::Window;

pub use bindings::{ArrayHandle, UniformHandle};
pub use config::RenderConfig;
pub use error::{RenderError, RenderResult};
pub use frames::{FrameAcquire, MAX_FRAMES_IN_FLIGHT};

use bindings::BindingRegistry;
use context::RenderContext;
use display::{Display, Rebuild};
use frames::{AcquireOutcome, FrameRing, FrameScheduler, PresentOutcome, VulkanFrameDriver};
use geometry::GeometryBuffers;
use resources::upload::TransferContext;
use scene::Scene;
use shader::ShaderStage;

/// Owns the Vulkan device, the presentation lifecycle, and everything
/// rendered with them.
///
/// Intended call pattern per window event loop iteration:
/// [`Renderer::acquire_frame`], per-frame uniform writes for the returned
/// image index, then [`Renderer::submit_and_present`]. Surface changes
/// (resize, out-of-date swapchain) are absorbed internally by rebuilding
/// the display on the next acquire.
pub struct Renderer {
    // Declaration order is drop order: everything holding device
    // resources goes before `ctx`.
    scheduler: FrameScheduler,
    ring: FrameRing,
    display: Display,
    geometry: GeometryBuffers,
    registry: BindingRegistry,
    shaders: Vec<ShaderStage>,
    upload: TransferContext,
    scene: Scene,
    config: RenderConfig,
    resize_requested: bool,
    ctx: RenderContext,
}

impl Renderer {
    pub fn new(window: &Window, config: RenderConfig) -> RenderResult<Self> {
        let ctx = RenderContext::new(window, &config)?;
        let upload = TransferContext::new(
            ctx.device.clone(),
            ctx.graphics_queue,
            ctx.queue_families.graphics,
        )?;
        let ring = FrameRing::new(ctx.device.clone())?;
        let registry = BindingRegistry::new(ctx.device.clone());

        Ok(Self {
            scheduler: FrameScheduler::new(),
            ring,
            display: Display::new(),
            geometry: GeometryBuffers::new(),
            registry,
            shaders: Vec::new(),
            upload,
            scene: Scene::new(),
            config,
            resize_requested: false,
            ctx,
        })
    }

    pub fn scene(&mut self) -> &mut Scene {
        &mut self.scene
    }

    /// Adds a compiled SPIR-V stage to the pipeline built on the next
    /// display (re)build.
    pub fn register_shader_stage(&mut self, code: Vec<u32>, stage: vk::ShaderStageFlags) {
        self.shaders.push(ShaderStage { code, stage });
    }

    /// Declares a per-frame uniform visible to `stages`. Slots are handed
    /// out in registration order and match the shader's binding indices.
    pub fn register_uniform<T: Pod>(
        &mut self,
        stages: vk::ShaderStageFlags,
    ) -> RenderResult<UniformHandle<T>> {
        self.registry.register_uniform::<T>(stages)
    }

    /// Declares a per-frame storage array of up to `capacity` elements.
    pub fn register_array<T: Pod>(
        &mut self,
        stages: vk::ShaderStageFlags,
        capacity: u64,
    ) -> RenderResult<ArrayHandle<T>> {
        self.registry.register_array::<T>(stages, capacity)
    }

    /// Freezes resource registration. Must be called once before the
    /// first display build; later registrations are rejected.
    pub fn finalize_bindings(&mut self) -> RenderResult<()> {
        self.registry.finalize_layout()
    }

    /// Builds the presentation stack for the first time. A zero-area
    /// framebuffer is not an error; the build is retried on later ticks.
    pub fn build_display(&mut self, framebuffer: (u32, u32)) -> RenderResult<()> {
        self.rebuild_display(framebuffer)?;
        Ok(())
    }

    /// Records that the window changed size. Consumed on the next
    /// present, which routes the frame after it through a rebuild.
    pub fn notify_resized(&mut self) {
        self.resize_requested = true;
    }

    /// Extent of the current display generation, if one is built.
    pub fn presentation_extent(&self) -> Option<vk::Extent2D> {
        self.display.extent()
    }

    pub fn write_uniform<T: Pod>(
        &mut self,
        handle: &UniformHandle<T>,
        image_index: u32,
        value: &T,
    ) -> RenderResult<()> {
        self.registry.write_uniform(handle, image_index, value)
    }

    pub fn write_array<T: Pod>(
        &mut self,
        handle: &ArrayHandle<T>,
        image_index: u32,
        values: &[T],
    ) -> RenderResult<()> {
        self.registry.write_array(handle, image_index, values)
    }

    /// Starts a frame: rebuilds the display if it is stale (or was never
    /// built), then acquires a presentation image.
    ///
    /// Returns [`FrameAcquire::Skip`] when no image can be produced this
    /// tick; the caller simply tries again on the next one.
    pub fn acquire_frame(&mut self, framebuffer: (u32, u32)) -> RenderResult<FrameAcquire> {
        // Geometry growth cannot be patched into recorded command
        // buffers; route it through a full rebuild.
        if self.display.is_built()
            && self.scene.is_dirty()
            && self.geometry.capacity_differs(&self.scene)
        {
            self.display.mark_stale();
        }

        if !self.display.is_built() {
            match self.rebuild_display(framebuffer)? {
                Rebuild::Rebuilt => {}
                Rebuild::Deferred => return Ok(FrameAcquire::Skip),
            }
        }

        let (Some(swapchain), Some(bundle)) = (self.display.swapchain(), self.display.bundle())
        else {
            return Ok(FrameAcquire::Skip);
        };
        let mut driver = VulkanFrameDriver {
            device: &self.ctx.device,
            ring: &self.ring,
            swapchain,
            bundle,
            graphics_queue: self.ctx.graphics_queue,
            present_queue: self.ctx.present_queue,
        };
        let outcome = self.scheduler.acquire(&mut driver)?;

        match outcome {
            AcquireOutcome::OutOfDate => {
                self.display.mark_stale();
                Ok(FrameAcquire::Skip)
            }
            AcquireOutcome::Ready { image_index } => {
                // Same-capacity scene edits are re-uploaded in place; the
                // recorded draws stay valid.
                if self.scene.is_dirty() {
                    self.geometry
                        .refresh(&self.ctx, &self.upload, &mut self.scene)?;
                }
                Ok(FrameAcquire::Image(image_index))
            }
        }
    }

    /// Finishes the frame started by [`Renderer::acquire_frame`]:
    /// submits the recorded commands and presents the acquired image.
    pub fn submit_and_present(&mut self) -> RenderResult<()> {
        let (Some(swapchain), Some(bundle)) = (self.display.swapchain(), self.display.bundle())
        else {
            return Err(RenderError::FrameNotAcquired);
        };
        let mut driver = VulkanFrameDriver {
            device: &self.ctx.device,
            ring: &self.ring,
            swapchain,
            bundle,
            graphics_queue: self.ctx.graphics_queue,
            present_queue: self.ctx.present_queue,
        };
        let outcome = self.scheduler.submit_and_present(&mut driver)?;

        let resized = std::mem::take(&mut self.resize_requested);
        if outcome != PresentOutcome::Presented || resized {
            self.display.mark_stale();
        }
        Ok(())
    }

    fn rebuild_display(&mut self, framebuffer: (u32, u32)) -> RenderResult<Rebuild> {
        let rebuild = self.display.rebuild(
            &self.ctx,
            &self.config,
            framebuffer,
            &mut self.scene,
            &mut self.geometry,
            &mut self.registry,
            &self.shaders,
            &self.upload,
        )?;
        if rebuild == Rebuild::Rebuilt {
            // Image indices of the old generation mean nothing now.
            self.scheduler
                .reset_images(self.display.image_count() as usize);
        }
        Ok(rebuild)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Fields drop in declaration order after this runs; nothing may
        // still be executing on the device when they do.
        if let Err(err) = self.ctx.wait_idle() {
            log::error!("Failed to wait for device idle on shutdown: {err}");
        }
    }
}

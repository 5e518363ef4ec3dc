use ash::vk;

use crate::renderer::bindings::BindingRegistry;
use crate::renderer::config::RenderConfig;
use crate::renderer::context::RenderContext;
use crate::renderer::error::RenderResult;
use crate::renderer::geometry::GeometryBuffers;
use crate::renderer::pipeline::PipelineBundle;
use crate::renderer::resources::upload::TransferContext;
use crate::renderer::scene::Scene;
use crate::renderer::shader::ShaderStage;
use crate::renderer::swapchain::{SurfaceState, Swapchain};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayState {
    /// No swapchain has ever been built.
    Uninitialized,
    /// Swapchain and pipeline bundle are presentable.
    Built,
    /// The current generation no longer matches the surface and must be
    /// rebuilt before the next draw.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rebuild {
    Rebuilt,
    /// The drawable area was zero; nothing was torn down or built.
    Deferred,
}

/// Owns the swapchain and pipeline bundle and moves them through the
/// Uninitialized -> Built -> Stale -> Built lifecycle. Teardown and
/// reconstruction happen atomically inside `rebuild`, behind a device
/// idle wait.
pub struct Display {
    state: DisplayState,
    surface_state: Option<SurfaceState>,
    // Bundle drops before the swapchain whose views it references.
    bundle: Option<PipelineBundle>,
    swapchain: Option<Swapchain>,
}

impl Display {
    pub fn new() -> Self {
        Self {
            state: DisplayState::Uninitialized,
            surface_state: None,
            bundle: None,
            swapchain: None,
        }
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    pub fn is_built(&self) -> bool {
        self.state == DisplayState::Built
    }

    /// Flags the current generation as unusable. Only meaningful once
    /// something has been built.
    pub fn mark_stale(&mut self) {
        if self.state == DisplayState::Built {
            self.state = DisplayState::Stale;
            log::debug!("Display marked stale");
        }
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.surface_state.map(|state| state.extent)
    }

    pub fn image_count(&self) -> u32 {
        self.swapchain
            .as_ref()
            .map_or(0, |swapchain| swapchain.image_count())
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn bundle(&self) -> Option<&PipelineBundle> {
        self.bundle.as_ref()
    }

    /// Tears down the previous generation (if any) and builds the next one
    /// against the surface's current properties: swapchain, refreshed
    /// geometry, pipeline bundle, per-image binding storage, descriptor
    /// sets, and freshly recorded command buffers.
    ///
    /// A zero-area framebuffer defers the whole operation; the previous
    /// generation is left untouched and the display stays (or becomes)
    /// stale until the window has area again.
    #[allow(clippy::too_many_arguments)]
    pub fn rebuild(
        &mut self,
        ctx: &RenderContext,
        config: &RenderConfig,
        framebuffer: (u32, u32),
        scene: &mut Scene,
        geometry: &mut GeometryBuffers,
        registry: &mut BindingRegistry,
        stages: &[ShaderStage],
        upload: &TransferContext,
    ) -> RenderResult<Rebuild> {
        let descriptor_layout = registry.layout()?;

        let Some(surface_state) = SurfaceState::query(ctx, config.vsync, framebuffer)? else {
            self.mark_stale();
            log::debug!("Deferring display rebuild: zero-area framebuffer");
            return Ok(Rebuild::Deferred);
        };

        if self.swapchain.is_some() || self.bundle.is_some() {
            // Nothing of the old generation may be in flight when it dies.
            ctx.wait_idle()?;
            self.bundle = None;
            registry.release_per_image_storage();
            self.swapchain = None;
        }

        let swapchain = Swapchain::new(ctx, &surface_state)?;
        geometry.refresh(ctx, upload, scene)?;

        let mut bundle =
            PipelineBundle::new(ctx, &swapchain, descriptor_layout, stages, upload)?;
        registry.prepare_per_image_storage(ctx, swapchain.image_count())?;
        registry.build_sets(swapchain.image_count())?;
        bundle.record_commands(geometry, registry)?;

        log::info!(
            "Display built: {}x{}, {} images, {:?}",
            surface_state.extent.width,
            surface_state.extent.height,
            swapchain.image_count(),
            surface_state.present_mode,
        );

        self.surface_state = Some(surface_state);
        self.swapchain = Some(swapchain);
        self.bundle = Some(bundle);
        self.state = DisplayState::Built;
        Ok(Rebuild::Rebuilt)
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uninitialized_with_no_extent() {
        let display = Display::new();
        assert_eq!(display.state(), DisplayState::Uninitialized);
        assert!(display.extent().is_none());
        assert_eq!(display.image_count(), 0);
    }

    #[test]
    fn staleness_needs_something_built() {
        let mut display = Display::new();
        display.mark_stale();
        assert_eq!(display.state(), DisplayState::Uninitialized);
    }
}

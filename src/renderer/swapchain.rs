use std::sync::Arc;

use ash::vk;

use crate::renderer::context::RenderContext;
use crate::renderer::error::{RenderError, RenderResult};

/// Everything negotiated with the surface for one display generation.
/// Recomputed from scratch on every rebuild and replaced wholesale.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceState {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

impl SurfaceState {
    /// Queries the surface and picks format, present mode, extent, and
    /// image count. Returns `None` while the drawable area is zero, which
    /// callers treat as "defer the rebuild".
    pub fn query(
        ctx: &RenderContext,
        vsync: bool,
        framebuffer: (u32, u32),
    ) -> RenderResult<Option<Self>> {
        let (capabilities, formats, present_modes) = unsafe {
            let capabilities = ctx
                .surface_loader
                .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)?;
            let formats = ctx
                .surface_loader
                .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)?;
            let present_modes = ctx
                .surface_loader
                .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)?;
            (capabilities, formats, present_modes)
        };

        let format = choose_surface_format(&formats).ok_or(RenderError::NoSurfaceFormat)?;
        let present_mode = choose_present_mode(&present_modes, vsync);
        let Some(extent) = choose_extent(&capabilities, framebuffer) else {
            return Ok(None);
        };

        Ok(Some(Self {
            format,
            present_mode,
            extent,
            image_count: choose_image_count(&capabilities),
            transform: capabilities.current_transform,
        }))
    }
}

fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|surface_format| {
            surface_format.format == vk::Format::B8G8R8A8_SRGB
                && surface_format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

fn choose_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's `current_extent` is authoritative unless it carries the
/// `u32::MAX` sentinel, in which case the framebuffer size is clamped into
/// the supported range. A zero-area result yields `None`.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer: (u32, u32),
) -> Option<vk::Extent2D> {
    if framebuffer.0 == 0 || framebuffer.1 == 0 {
        return None;
    }
    let extent = if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer.0.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: framebuffer.1.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    };
    if extent.width == 0 || extent.height == 0 {
        return None;
    }
    Some(extent)
}

/// One more than the minimum so acquisition rarely waits on the driver,
/// capped to the maximum when the surface reports one (zero means none).
fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// The swapchain of the current display generation together with one view
/// per image.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<ash::Device>,
}

impl Swapchain {
    pub fn new(ctx: &RenderContext, state: &SurfaceState) -> RenderResult<Self> {
        let loader = ash::khr::swapchain::Device::new(&ctx.instance, &ctx.device);

        let family_indices = [ctx.queue_families.graphics, ctx.queue_families.present];
        let mut info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(state.image_count)
            .image_format(state.format.format)
            .image_color_space(state.format.color_space)
            .image_extent(state.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(state.transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(state.present_mode)
            .clipped(true);
        info = if ctx.queue_families.graphics != ctx.queue_families.present {
            info.image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let handle = unsafe { loader.create_swapchain(&info, None)? };
        let images = unsafe { loader.get_swapchain_images(handle)? };

        let device = Arc::clone(&ctx.device);
        let mut views = Vec::with_capacity(images.len());
        for image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(*image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(state.format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            match unsafe { device.create_image_view(&view_info, None) } {
                Ok(view) => views.push(view),
                Err(err) => {
                    for view in views {
                        unsafe { device.destroy_image_view(view, None) };
                    }
                    unsafe { loader.destroy_swapchain(handle, None) };
                    return Err(err.into());
                }
            }
        }

        Ok(Self {
            handle,
            loader,
            images,
            views,
            format: state.format.format,
            extent: state.extent,
            device,
        })
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for view in self.views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(
        current: (u32, u32),
        min_count: u32,
        max_count: u32,
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_srgb_bgra_format() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn vsync_forces_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&modes, false),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(choose_present_mode(&[], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn current_extent_is_authoritative() {
        let caps = capabilities((800, 600), 2, 0);
        let extent = choose_extent(&caps, (1024, 768)).unwrap();
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn sentinel_extent_clamps_framebuffer_size() {
        let caps = capabilities((u32::MAX, u32::MAX), 2, 0);
        let extent = choose_extent(&caps, (8192, 2)).unwrap();
        assert_eq!((extent.width, extent.height), (4096, 2));
    }

    #[test]
    fn zero_area_framebuffer_defers() {
        let caps = capabilities((u32::MAX, u32::MAX), 2, 0);
        assert!(choose_extent(&caps, (0, 0)).is_none());
        assert!(choose_extent(&caps, (640, 0)).is_none());

        // A minimized window can also report a zero current extent.
        let caps = capabilities((0, 0), 2, 0);
        assert!(choose_extent(&caps, (640, 480)).is_none());
    }

    #[test]
    fn image_count_is_min_plus_one_capped_at_max() {
        assert_eq!(choose_image_count(&capabilities((1, 1), 2, 0)), 3);
        assert_eq!(choose_image_count(&capabilities((1, 1), 2, 3)), 3);
        assert_eq!(choose_image_count(&capabilities((1, 1), 3, 3)), 3);
    }

    #[test]
    fn choices_are_stable_across_repeat_queries() {
        let caps = capabilities((1280, 720), 2, 8);
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];

        let first = (
            choose_surface_format(&formats).unwrap(),
            choose_present_mode(&modes, false),
            choose_extent(&caps, (1280, 720)).unwrap(),
            choose_image_count(&caps),
        );
        let second = (
            choose_surface_format(&formats).unwrap(),
            choose_present_mode(&modes, false),
            choose_extent(&caps, (1280, 720)).unwrap(),
            choose_image_count(&caps),
        );

        assert_eq!(first.0.format, second.0.format);
        assert_eq!(first.0.color_space, second.0.color_space);
        assert_eq!(first.1, second.1);
        assert_eq!(first.2.width, second.2.width);
        assert_eq!(first.2.height, second.2.height);
        assert_eq!(first.3, second.3);
    }
}

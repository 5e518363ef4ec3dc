use std::ffi::{c_char, CStr};
use std::sync::Arc;

use ash::vk;

use crate::renderer::error::{RenderError, RenderResult};

/// Queue families resolved for the selected physical device. Graphics and
/// present may name the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Picks the first physical device, in enumeration order, that can drive
/// the surface. Qualifying devices are never ranked against each other.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> RenderResult<(vk::PhysicalDevice, QueueFamilies)> {
    let physical_devices = unsafe { instance.enumerate_physical_devices()? };
    if physical_devices.is_empty() {
        return Err(RenderError::NoCapableDevice);
    }

    for physical_device in physical_devices {
        if !device_suitable(instance, physical_device, surface_loader, surface)? {
            continue;
        }

        let families =
            find_queue_families(instance, physical_device, surface_loader, surface)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {:?} (graphics family {}, present family {})",
            properties.device_name_as_c_str().unwrap_or(c"unknown"),
            families.graphics,
            families.present,
        );
        return Ok((physical_device, families));
    }

    Err(RenderError::NoCapableDevice)
}

/// Resolves both queue families on an already-selected device. Unlike the
/// suitability probe this fails loudly, naming the missing family.
pub fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> RenderResult<QueueFamilies> {
    let (graphics, present) =
        queue_family_indices(instance, physical_device, surface_loader, surface)?;
    let graphics = graphics.ok_or(RenderError::MissingQueueFamily("graphics"))?;
    let present = present.ok_or(RenderError::MissingQueueFamily("present"))?;
    Ok(QueueFamilies { graphics, present })
}

pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: QueueFamilies,
) -> RenderResult<(Arc<ash::Device>, vk::Queue, vk::Queue)> {
    let priorities = [1.0f32];
    let queue_infos = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&priorities)
        })
        .collect::<Vec<_>>();

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);
    let extension_names = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect::<Vec<*const c_char>>();

    let device_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &device_info, None)? };
    let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
    let present_queue = unsafe { device.get_device_queue(families.present, 0) };

    Ok((Arc::new(device), graphics_queue, present_queue))
}

fn device_suitable(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> RenderResult<bool> {
    let (graphics, present) =
        queue_family_indices(instance, physical_device, surface_loader, surface)?;
    if graphics.is_none() || present.is_none() {
        return Ok(false);
    }

    let available = unsafe {
        instance.enumerate_device_extension_properties(physical_device)?
    };
    for required in required_device_extensions() {
        let found = available.iter().any(|ext| {
            ext.extension_name_as_c_str()
                .is_ok_and(|name| name == required)
        });
        if !found {
            log::debug!("Device rejected: missing extension {:?}", required);
            return Ok(false);
        }
    }

    let formats = unsafe {
        surface_loader.get_physical_device_surface_formats(physical_device, surface)?
    };
    let present_modes = unsafe {
        surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
    };
    if formats.is_empty() || present_modes.is_empty() {
        return Ok(false);
    }

    let features = unsafe { instance.get_physical_device_features(physical_device) };
    if features.sampler_anisotropy != vk::TRUE {
        return Ok(false);
    }

    Ok(true)
}

fn queue_family_indices(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> RenderResult<(Option<u32>, Option<u32>)> {
    let families = unsafe {
        instance.get_physical_device_queue_family_properties(physical_device)
    };

    let graphics = families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32);

    let mut present = None;
    for index in 0..families.len() as u32 {
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                physical_device,
                index,
                surface,
            )?
        };
        if supported {
            present = Some(index);
            break;
        }
    }

    Ok((graphics, present))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_families_collapse_when_shared() {
        let shared = QueueFamilies { graphics: 0, present: 0 };
        assert_eq!(shared.unique(), vec![0]);

        let split = QueueFamilies { graphics: 0, present: 2 };
        assert_eq!(split.unique(), vec![0, 2]);
    }
}

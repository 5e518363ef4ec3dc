use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use crate::renderer::config::RenderConfig;
use crate::renderer::device::{self, QueueFamilies};
use crate::renderer::error::{RenderError, RenderResult};

/// Owns the Vulkan objects every other component borrows: instance,
/// surface, device, queues, and the memory allocator. Created once at
/// startup and passed by reference; destroyed after everything that
/// allocates from it.
pub struct RenderContext {
    pub physical_device: vk::PhysicalDevice,
    pub device: Arc<ash::Device>,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,

    pub instance: ash::Instance,

    allocator: Option<Arc<Mutex<Allocator>>>,
    debug_utils_loader: ash::ext::debug_utils::Instance,
    debug_utils_messenger: vk::DebugUtilsMessengerEXT,
    entry: ash::Entry,
}

impl RenderContext {
    const ENABLE_VALIDATION_LAYERS: bool = cfg!(debug_assertions);
    const REQUIRED_VALIDATION_LAYERS: &'static [&'static CStr] =
        &[c"VK_LAYER_KHRONOS_validation"];

    pub fn new(window: &Window, config: &RenderConfig) -> RenderResult<Self> {
        let entry = ash::Entry::linked();

        let instance = Self::create_instance(&entry, window, config)?;
        let (
            debug_utils_loader,
            debug_utils_messenger,
        ) = Self::create_debug_utils_messenger(&entry, &instance)?;

        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let (physical_device, queue_families) =
            device::select_physical_device(&instance, &surface_loader, surface)?;
        let (device, graphics_queue, present_queue) =
            device::create_logical_device(&instance, physical_device, queue_families)?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            physical_device,
            device,
            graphics_queue,
            present_queue,
            queue_families,
            surface,
            surface_loader,
            instance,
            allocator: Some(Arc::new(Mutex::new(allocator))),
            debug_utils_loader,
            debug_utils_messenger,
            entry,
        })
    }

    pub fn allocator(&self) -> Arc<Mutex<Allocator>> {
        Arc::clone(self.allocator.as_ref().expect("allocator released early"))
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    fn create_instance(
        entry: &ash::Entry,
        window: &Window,
        config: &RenderConfig,
    ) -> RenderResult<ash::Instance> {
        if Self::ENABLE_VALIDATION_LAYERS {
            Self::check_validation_layers_supported(entry)?;
        }

        let app_name = CString::new(config.app_name.as_str()).unwrap_or_default();
        let application_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .api_version(vk::API_VERSION_1_3);

        let enabled_layer_names = if Self::ENABLE_VALIDATION_LAYERS {
            Self::REQUIRED_VALIDATION_LAYERS
                .iter()
                .map(|layer| layer.as_ptr())
                .collect::<Vec<*const c_char>>()
        } else {
            Vec::new()
        };

        let mut enabled_extension_names = ash_window::enumerate_required_extensions(
            window.display_handle()?.as_raw(),
        )?
        .to_vec();
        if Self::ENABLE_VALIDATION_LAYERS {
            enabled_extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let mut debug_info = debug_utils_messenger_create_info();
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        if Self::ENABLE_VALIDATION_LAYERS {
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        Ok(unsafe { entry.create_instance(&instance_info, None)? })
    }

    fn check_validation_layers_supported(entry: &ash::Entry) -> RenderResult<()> {
        let available = unsafe { entry.enumerate_instance_layer_properties()? };
        for required in Self::REQUIRED_VALIDATION_LAYERS {
            let found = available.iter().any(|layer| {
                layer
                    .layer_name_as_c_str()
                    .is_ok_and(|name| name == *required)
            });
            if !found {
                return Err(RenderError::MissingValidationLayer(required));
            }
        }
        Ok(())
    }

    fn create_debug_utils_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> RenderResult<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let messenger = if Self::ENABLE_VALIDATION_LAYERS {
            unsafe {
                loader.create_debug_utils_messenger(
                    &debug_utils_messenger_create_info(),
                    None,
                )?
            }
        } else {
            vk::DebugUtilsMessengerEXT::null()
        };
        Ok((loader, messenger))
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        // Every buffer and image is gone by now; the allocator must be
        // released before the device it allocates from.
        drop(self.allocator.take());
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if self.debug_utils_messenger != vk::DebugUtilsMessengerEXT::null() {
                self.debug_utils_loader
                    .destroy_debug_utils_messenger(self.debug_utils_messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn debug_utils_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = unsafe { CStr::from_ptr((*callback_data).p_message) };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::trace!("[{:?}] {:?}", message_type, message)
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[{:?}] {:?}", message_type, message)
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[{:?}] {:?}", message_type, message)
        }
        _ => log::error!("[{:?}] {:?}", message_type, message),
    }
    vk::FALSE
}

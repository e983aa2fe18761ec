//! Vulkan objects shared by every window thread.
//!
//! One instance, one logical device and one graphics queue serve all windows.
//! Queue submission and presentation must be externally synchronized, so the
//! queue is only reachable through [`SharedVulkan::lock_queue`].

mod select;
pub mod swapchain;

pub use select::*;

use std::ffi::{CStr, CString, c_void};

use ash::{
    Device, Entry, Instance,
    ext::debug_utils,
    khr::{
        get_physical_device_properties2, portability_enumeration, portability_subset,
        surface as khr_surface, swapchain as khr_swapchain,
    },
    vk,
};
use parking_lot::{Mutex, MutexGuard};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::RunnerConfig;
use crate::error::{AppError, AppResult};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct SharedVulkan {
    // Keeps the loader library alive for the lifetime of the instance.
    entry: Entry,
    instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: khr_surface::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
    device: Device,
    queue: Mutex<vk::Queue>,
    min_image_count: u32,
}

impl SharedVulkan {
    /// Creates the instance, picks a GPU and creates the logical device.
    ///
    /// `display` supplies the platform's required surface extensions; call this on
    /// the event-loop thread before any window thread starts.
    pub fn new(display: RawDisplayHandle, config: &RunnerConfig) -> AppResult<Self> {
        let entry = unsafe { Entry::load()? };

        let app_name = CString::new(config.window_title.as_str())?;
        let engine_name = c"dear-threaded-ash";
        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name.as_c_str())
            .engine_name(engine_name)
            .api_version(vk::make_api_version(0, 1, 0, 0));

        let available = unsafe { entry.enumerate_instance_extension_properties(None)? };
        let available_names: Vec<&CStr> = available
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok())
            .collect();

        let mut extensions: Vec<*const std::ffi::c_char> =
            ash_window::enumerate_required_extensions(display)?.to_vec();
        let mut flags = vk::InstanceCreateFlags::empty();

        if contains_name(available_names.iter().copied(), get_physical_device_properties2::NAME) {
            extensions.push(get_physical_device_properties2::NAME.as_ptr());
        }
        if contains_name(available_names.iter().copied(), portability_enumeration::NAME) {
            extensions.push(portability_enumeration::NAME.as_ptr());
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let mut layers: Vec<*const std::ffi::c_char> = Vec::new();
        let validation = config.validation && {
            let layer_props = unsafe { entry.enumerate_instance_layer_properties()? };
            let has_layer = contains_name(
                layer_props
                    .iter()
                    .filter_map(|p| p.layer_name_as_c_str().ok()),
                VALIDATION_LAYER,
            );
            let has_utils = contains_name(available_names.iter().copied(), debug_utils::NAME);
            if !(has_layer && has_utils) {
                warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
            }
            has_layer && has_utils
        };
        if validation {
            layers.push(VALIDATION_LAYER.as_ptr());
            extensions.push(debug_utils::NAME.as_ptr());
        }

        let instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .flags(flags)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);
        let instance = unsafe { entry.create_instance(&instance_create_info, None)? };

        let debug = if validation {
            match create_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    warn!("Failed to install Vulkan debug messenger: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = khr_surface::Instance::new(&entry, &instance);

        // From here on, failures must destroy the instance created above.
        let picked = pick_physical_device(&instance);
        let (physical_device, queue_family_index) = match picked {
            Ok(v) => v,
            Err(e) => {
                unsafe { destroy_instance(&instance, debug.as_ref()) };
                return Err(e);
            }
        };

        let (device, queue) = match create_device(&instance, physical_device, queue_family_index)
        {
            Ok(v) => v,
            Err(e) => {
                unsafe { destroy_instance(&instance, debug.as_ref()) };
                return Err(e);
            }
        };

        info!(
            queue_family_index,
            validation, "Vulkan device created for threaded windows"
        );

        Ok(Self {
            entry,
            instance,
            debug,
            surface_loader,
            physical_device,
            queue_family_index,
            device,
            queue: Mutex::new(queue),
            min_image_count: config.min_image_count,
        })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn surface_loader(&self) -> &khr_surface::Instance {
        &self.surface_loader
    }

    pub fn min_image_count(&self) -> u32 {
        self.min_image_count
    }

    /// Exclusive access to the graphics queue.
    ///
    /// Hold the guard for every `vkQueueSubmit`, `vkQueuePresentKHR` and
    /// `vkDeviceWaitIdle`, including the renderer's texture uploads.
    pub fn lock_queue(&self) -> MutexGuard<'_, vk::Queue> {
        self.queue.lock()
    }

    /// Creates a presentation surface. Call on the event-loop thread.
    pub fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: raw_window_handle::RawWindowHandle,
    ) -> AppResult<vk::SurfaceKHR> {
        let surface = unsafe {
            ash_window::create_surface(&self.entry, &self.instance, display, window, None)?
        };
        Ok(surface)
    }

    /// Destroys a surface whose swapchain is already gone.
    pub fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        unsafe { self.surface_loader.destroy_surface(surface, None) };
    }

    /// Whether the shared graphics queue can present to `surface`.
    pub fn supports_present(&self, surface: vk::SurfaceKHR) -> AppResult<bool> {
        let supported = unsafe {
            self.surface_loader.get_physical_device_surface_support(
                self.physical_device,
                self.queue_family_index,
                surface,
            )?
        };
        Ok(supported)
    }

    /// Waits until the device is idle, holding the queue lock.
    pub fn wait_idle(&self) -> AppResult<()> {
        let _queue = self.lock_queue();
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for SharedVulkan {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            destroy_instance(&self.instance, self.debug.as_ref());
        }
        debug!("Shared Vulkan device destroyed");
    }
}

unsafe fn destroy_instance(
    instance: &Instance,
    debug: Option<&(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
) {
    unsafe {
        if let Some((loader, messenger)) = debug {
            loader.destroy_debug_utils_messenger(*messenger, None);
        }
        instance.destroy_instance(None);
    }
}

fn pick_physical_device(instance: &Instance) -> AppResult<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    let types: Vec<vk::PhysicalDeviceType> = devices
        .iter()
        .map(|&d| unsafe { instance.get_physical_device_properties(d) }.device_type)
        .collect();
    let index = preferred_device_index(&types).ok_or(AppError::NoPhysicalDevice)?;
    let device = devices[index];

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let family = graphics_queue_family(&families).ok_or(AppError::NoGraphicsQueue)?;
    debug!(device_type = ?types[index], family, "Selected physical device");
    Ok((device, family))
}

fn create_device(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
) -> AppResult<(Device, vk::Queue)> {
    let priorities = [1.0f32];
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family_index)
        .queue_priorities(&priorities);

    let available =
        unsafe { instance.enumerate_device_extension_properties(physical_device)? };
    let mut extensions = vec![khr_swapchain::NAME.as_ptr()];
    if contains_name(
        available
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok()),
        portability_subset::NAME,
    ) {
        extensions.push(portability_subset::NAME.as_ptr());
    }

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&extensions);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };
    let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
    Ok((device, queue))
}

fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> AppResult<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback));
    let messenger = unsafe { loader.create_debug_utils_messenger(&info, None)? };
    Ok((loader, messenger))
}

unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = unsafe {
        if data.is_null() || (*data).p_message.is_null() {
            std::borrow::Cow::Borrowed("<no message>")
        } else {
            CStr::from_ptr((*data).p_message).to_string_lossy()
        }
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", ?kind, "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", ?kind, "{message}");
    } else {
        trace!(target: "vulkan", ?kind, "{message}");
    }
    vk::FALSE
}

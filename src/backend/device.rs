// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layers
// - Debug messenger routed into `log`
// - Surface creation for the window
// - Physical device selection (first adapter that qualifies)
// - Logical device + graphics/present queues

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use std::ffi::{CStr, CString};
use std::sync::Arc;
use winit::window::Window;

use super::surface;
use crate::error::InitError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue family indices the renderer needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// One entry per distinct family, so a shared family gets one queue create info
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// What the selection step knows about one adapter
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub has_swapchain_extension: bool,
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
    pub sampler_anisotropy: bool,
}

impl DeviceCandidate {
    pub fn queue_families(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics_family?,
            present: self.present_family?,
        })
    }

    pub fn is_suitable(&self) -> bool {
        self.has_swapchain_extension
            && self.queue_families().is_some()
            && self.surface_format_count > 0
            && self.present_mode_count > 0
            && self.sampler_anisotropy
    }
}

/// Whether `name` is among the extensions a device reports
pub fn has_extension(extensions: &[vk::ExtensionProperties], name: &CStr) -> bool {
    extensions
        .iter()
        .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
}

/// Pick the first adapter that qualifies, in enumeration order.
pub fn select_physical_device(candidates: &[DeviceCandidate]) -> Result<&DeviceCandidate, InitError> {
    if candidates.is_empty() {
        return Err(InitError::NoAdapters);
    }

    candidates
        .iter()
        .find(|candidate| {
            let suitable = candidate.is_suitable();
            if !suitable {
                log::debug!("Skipping unsuitable GPU: {}", candidate.name);
            }
            suitable
        })
        .ok_or(InitError::NoSuitableAdapter {
            checked: candidates.len(),
        })
}

/// Surface capabilities, formats and present modes for one adapter
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    pub surface_loader: khr::Surface,
    pub surface: vk::SurfaceKHR,

    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// Create the device and the surface for `window`.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Request validation layers (skipped if unavailable)
    pub fn new(app_name: &str, window: &Window, enable_validation: bool) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let enable_validation = enable_validation && Self::validation_available(&entry)?;
        let display = surface::display_handle(window)?;
        let instance = Self::create_instance(&entry, app_name, display, enable_validation)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Create surface
        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = unsafe { surface::create_surface(&entry, &instance, window) }
            .context("Failed to create window surface")?;

        // Step 5: Pick physical device (GPU)
        let candidates = Self::describe_adapters(&instance, &surface_loader, surface)?;
        let chosen = select_physical_device(&candidates)?;
        let physical_device = chosen.handle;
        let queue_families = chosen
            .queue_families()
            .context("Selected GPU lost its queue families")?;

        // Step 6: Create logical device
        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance, physical_device, queue_families)?;

        // Step 7: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!("Selected GPU: {}", chosen.name);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={}, present={}",
            queue_families.graphics,
            queue_families.present
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            _entry: entry,
            surface_loader,
            surface,
            queue_families,
            graphics_queue,
            present_queue,
            debug_utils,
            properties,
            memory_properties,
        }))
    }

    fn validation_available(entry: &Entry) -> Result<bool> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;
        let found = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

        if !found {
            log::warn!("Validation layers requested, but not available");
        }
        Ok(found)
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display: raw_window_handle::RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"No Engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Surface extensions for this platform, plus debug utils when validating
        let mut extensions: Vec<*const std::ffi::c_char> = surface::required_extensions(display)?
            .into_iter()
            .map(CStr::as_ptr)
            .collect();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to set up debug messenger")?;

        Ok((debug_utils, messenger))
    }

    /// Gather everything `select_physical_device` needs, per adapter
    fn describe_adapters(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<DeviceCandidate>> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        devices
            .into_iter()
            .map(|device| -> Result<DeviceCandidate> {
                let props = unsafe { instance.get_physical_device_properties(device) };
                let features = unsafe { instance.get_physical_device_features(device) };
                let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned();

                let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
                    .context("Failed to enumerate device extensions")?;
                let has_swapchain_extension = has_extension(&extensions, khr::Swapchain::name());

                let queue_families =
                    unsafe { instance.get_physical_device_queue_family_properties(device) };
                let graphics_family = queue_families
                    .iter()
                    .position(|family| {
                        family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    })
                    .map(|i| i as u32);
                let mut present_family = None;
                for index in 0..queue_families.len() as u32 {
                    let supported = unsafe {
                        surface_loader.get_physical_device_surface_support(device, index, surface)
                    }
                    .context("Failed to query surface support")?;
                    if supported {
                        present_family = Some(index);
                        break;
                    }
                }

                // Only worth asking about formats when presentation is possible
                let (surface_format_count, present_mode_count) =
                    if has_swapchain_extension && present_family.is_some() {
                        let formats = unsafe {
                            surface_loader.get_physical_device_surface_formats(device, surface)
                        }?;
                        let modes = unsafe {
                            surface_loader.get_physical_device_surface_present_modes(device, surface)
                        }?;
                        (formats.len(), modes.len())
                    } else {
                        (0, 0)
                    };

                Ok(DeviceCandidate {
                    handle: device,
                    name,
                    has_swapchain_extension,
                    graphics_family,
                    present_family,
                    surface_format_count,
                    present_mode_count,
                    sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
                })
            })
            .collect()
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilies,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    /// Current surface capabilities, formats and present modes
    pub fn surface_support(&self) -> Result<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                    .context("Failed to query surface capabilities")?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(self.physical_device, self.surface)
                    .context("Failed to query surface formats")?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                    .context("Failed to query present modes")?,
            })
        }
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Reverse order of creation
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn capable(raw: u64) -> DeviceCandidate {
        DeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu{}", raw),
            has_swapchain_extension: true,
            graphics_family: Some(0),
            present_family: Some(0),
            surface_format_count: 2,
            present_mode_count: 1,
            sampler_anisotropy: true,
        }
    }

    #[test]
    fn zero_adapters_is_reported_as_no_vulkan_gpu() {
        let err = select_physical_device(&[]).unwrap_err();
        assert!(matches!(err, InitError::NoAdapters));
        assert_eq!(err.to_string(), "No Vulkan-capable GPU found");
    }

    #[test]
    fn unqualified_adapters_are_reported_as_no_suitable_gpu() {
        let mut no_swapchain = capable(1);
        no_swapchain.has_swapchain_extension = false;
        let mut no_present = capable(2);
        no_present.present_family = None;

        let err = select_physical_device(&[no_swapchain, no_present]).unwrap_err();
        assert!(matches!(err, InitError::NoSuitableAdapter { checked: 2 }));
        assert!(err.to_string().starts_with("No suitable GPU found"));
    }

    #[test]
    fn first_qualifying_adapter_wins() {
        let mut no_anisotropy = capable(1);
        no_anisotropy.sampler_anisotropy = false;
        let candidates = [no_anisotropy, capable(2), capable(3)];

        let chosen = select_physical_device(&candidates).unwrap();
        assert_eq!(chosen.handle.as_raw(), 2);
    }

    #[test]
    fn adapter_without_formats_or_modes_is_rejected() {
        let mut no_formats = capable(1);
        no_formats.surface_format_count = 0;
        let mut no_modes = capable(2);
        no_modes.present_mode_count = 0;

        assert!(!no_formats.is_suitable());
        assert!(!no_modes.is_suitable());
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, &src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = src as std::ffi::c_char;
        }
        props
    }

    #[test]
    fn swapchain_extension_is_found_by_name() {
        let reported = [extension(c"VK_KHR_maintenance1"), extension(khr::Swapchain::name())];
        assert!(has_extension(&reported, khr::Swapchain::name()));
        assert!(!has_extension(&reported[..1], khr::Swapchain::name()));
        assert!(!has_extension(&[], khr::Swapchain::name()));
    }

    #[test]
    fn shared_queue_family_creates_one_queue() {
        let shared = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        let split = QueueFamilies {
            graphics: 0,
            present: 2,
        };
        assert_eq!(shared.unique(), vec![0]);
        assert_eq!(split.unique(), vec![0, 2]);
    }
}

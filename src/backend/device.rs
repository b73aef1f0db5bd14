// Device context - instance, surface, adapter, logical device, queue
//
// Responsibilities:
// - Instance creation (window-system extensions, optional validation layer)
// - Presentation surface via the platform callback
// - Optional debug messenger, only when requested AND available
// - Adapter selection (prefer discrete GPU with a graphics+present queue)
// - Logical device + single queue
//
// Any failure unwinds what was already created before returning.

use ash::extensions::{ext, khr};
use ash::prelude::VkResult;
use ash::vk;
use std::ffi::CStr;

use super::gpu::Gpu;
use crate::error::BootstrapError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// What the caller asks of bootstrap
pub struct DeviceOptions<'a> {
    pub app_name: &'a CStr,
    /// Instance extensions the window system needs
    pub required_extensions: &'a [&'a CStr],
    pub debug_messenger: bool,
    pub validation_layers: bool,
}

/// Per-adapter facts used to pick one
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Indexed like `queue_families`
    pub present_support: Vec<bool>,
}

/// Pick the best adapter and its graphics+present queue family.
/// Discrete beats integrated beats anything else; ties keep the first.
pub fn choose_adapter(adapters: &[AdapterInfo]) -> Option<(usize, u32)> {
    let mut best = None;
    let mut best_score = 0;

    for (index, adapter) in adapters.iter().enumerate() {
        let family = adapter
            .queue_families
            .iter()
            .enumerate()
            .find(|(i, props)| {
                props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    && adapter.present_support.get(*i).copied().unwrap_or(false)
            })
            .map(|(i, _)| i as u32);

        let Some(family) = family else {
            continue;
        };

        let score = match adapter.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 1,
        };

        if score > best_score {
            best_score = score;
            best = Some((index, family));
        }
    }

    best
}

/// The process-lifetime GPU context. Destroyed last.
#[derive(Debug)]
pub struct DeviceContext {
    pub instance: vk::Instance,
    pub surface: vk::SurfaceKHR,
    /// Null when no messenger was installed
    pub debug_messenger: vk::DebugUtilsMessengerEXT,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
    pub queue: vk::Queue,
    pub queue_family: u32,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    pub fn new<G: Gpu>(
        gpu: &mut G,
        options: &DeviceOptions,
        create_surface: impl FnOnce(&mut G, vk::Instance) -> VkResult<vk::SurfaceKHR>,
    ) -> Result<Self, BootstrapError> {
        log::info!("Creating Vulkan device: {}", options.app_name.to_string_lossy());

        // Step 1: Instance
        let available = gpu.instance_extensions().unwrap_or_else(|e| {
            log::warn!("Failed to enumerate instance extensions: {}", e);
            Vec::new()
        });
        log::info!("Instance extensions: {:?}", available);

        let debug_utils_name = ext::DebugUtils::name();
        let install_messenger = options.debug_messenger
            && available
                .iter()
                .any(|name| name.as_bytes() == debug_utils_name.to_bytes());
        if options.debug_messenger && !install_messenger {
            log::warn!("Debug messenger requested but {} is unavailable", debug_utils_name.to_string_lossy());
        }

        let mut extensions = options.required_extensions.to_vec();
        if install_messenger {
            extensions.push(debug_utils_name);
        }

        let mut layers = Vec::new();
        if options.validation_layers {
            let available_layers = gpu.instance_layers().unwrap_or_default();
            if available_layers
                .iter()
                .any(|name| name.as_bytes() == VALIDATION_LAYER.to_bytes())
            {
                layers.push(VALIDATION_LAYER);
            } else {
                log::warn!("Validation layers requested but not installed");
            }
        }

        let instance = gpu
            .create_instance(options.app_name, &extensions, &layers)
            .map_err(BootstrapError::InstanceCreation)?;

        // Step 2: Surface
        let surface = match create_surface(gpu, instance) {
            Ok(surface) => surface,
            Err(e) => {
                gpu.destroy_instance(instance);
                return Err(BootstrapError::SurfaceCreation(e));
            }
        };

        // Step 3: Debug messenger (never fatal)
        let debug_messenger = if install_messenger {
            gpu.create_debug_messenger(instance).unwrap_or_else(|e| {
                log::warn!("Failed to install debug messenger: {}", e);
                vk::DebugUtilsMessengerEXT::null()
            })
        } else {
            vk::DebugUtilsMessengerEXT::null()
        };

        let partial = Self {
            instance,
            surface,
            debug_messenger,
            physical_device: vk::PhysicalDevice::null(),
            device: vk::Device::null(),
            queue: vk::Queue::null(),
            queue_family: 0,
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
        };

        match partial.open_device(gpu) {
            Ok(context) => Ok(context),
            Err(e) => {
                partial.destroy(gpu);
                Err(e)
            }
        }
    }

    // Steps 4-6 on top of an instance + surface
    fn open_device<G: Gpu>(&self, gpu: &mut G) -> Result<Self, BootstrapError> {
        // Step 4: Pick physical device
        let physical_devices = gpu
            .enumerate_physical_devices()
            .map_err(BootstrapError::AdapterEnumeration)?;
        if physical_devices.is_empty() {
            return Err(BootstrapError::NoAdapter);
        }

        let mut adapters = Vec::with_capacity(physical_devices.len());
        for &physical_device in &physical_devices {
            let properties = gpu
                .physical_device_properties(physical_device)
                .map_err(BootstrapError::AdapterEnumeration)?;
            let queue_families = gpu
                .queue_family_properties(physical_device)
                .map_err(BootstrapError::AdapterEnumeration)?;

            let present_support = (0..queue_families.len() as u32)
                .map(|family| {
                    gpu.surface_support(physical_device, family, self.surface)
                        .unwrap_or_else(|e| {
                            log::warn!("Surface support query failed: {}", e);
                            false
                        })
                })
                .collect();

            adapters.push(AdapterInfo {
                device_type: properties.device_type,
                queue_families,
                present_support,
            });
        }

        let (index, queue_family) = choose_adapter(&adapters).ok_or(BootstrapError::NoSuitableQueue)?;
        let physical_device = physical_devices[index];

        let properties = gpu
            .physical_device_properties(physical_device)
            .map_err(BootstrapError::AdapterEnumeration)?;
        let memory_properties = gpu
            .memory_properties(physical_device)
            .map_err(BootstrapError::AdapterEnumeration)?;

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        match gpu.device_extensions(physical_device) {
            Ok(names) => log::info!("Device extensions: {:?}", names),
            Err(e) => log::warn!("Failed to enumerate device extensions: {}", e),
        }

        // Step 5: Logical device
        let device = gpu
            .create_device(physical_device, queue_family, &[khr::Swapchain::name()])
            .map_err(BootstrapError::DeviceCreation)?;

        // Step 6: Queue
        let queue = match gpu.device_queue(queue_family, 0) {
            Ok(queue) => queue,
            Err(e) => {
                gpu.destroy_device(device);
                return Err(BootstrapError::DeviceCreation(e));
            }
        };

        Ok(Self {
            instance: self.instance,
            surface: self.surface,
            debug_messenger: self.debug_messenger,
            physical_device,
            device,
            queue,
            queue_family,
            memory_properties,
        })
    }

    /// Device, then debug messenger, then surface, then instance
    pub fn destroy<G: Gpu>(&self, gpu: &mut G) {
        log::info!("Destroying Vulkan device...");

        if self.device != vk::Device::null() {
            gpu.destroy_device(self.device);
        }
        if self.debug_messenger != vk::DebugUtilsMessengerEXT::null() {
            gpu.destroy_debug_messenger(self.debug_messenger);
        }
        if self.surface != vk::SurfaceKHR::null() {
            gpu.destroy_surface(self.surface);
        }
        if self.instance != vk::Instance::null() {
            gpu.destroy_instance(self.instance);
        }
    }
}

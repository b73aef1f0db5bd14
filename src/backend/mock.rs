// Recording `Gpu` double for tests
//
// Hands out unique handles, tracks which objects are alive and who owns
// them, and logs every call by its native name. Lifetime mistakes (use after
// destroy, double destroy, parent destroyed before its children, freeing
// mapped memory) are collected as violations rather than panics so a test can
// assert on the whole run. Mapped memory is backed by real host bytes.
// Fences and binary semaphores carry a signal state, and swapchain images
// are tracked from acquire until present.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ffi::CStr;

use super::gpu::{DrawRecording, Gpu, LayoutTransition, PipelineDesc, Submission, SwapchainDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Instance,
    Messenger,
    Surface,
    Device,
    Queue,
    Swapchain,
    SwapchainImage,
    Buffer,
    Memory,
    Image,
    ImageView,
    Sampler,
    SetLayout,
    DescriptorPool,
    DescriptorSet,
    RenderPass,
    Framebuffer,
    ShaderModule,
    PipelineLayout,
    PipelineCache,
    Pipeline,
    CommandPool,
    CommandBuffer,
    Fence,
    Semaphore,
}

impl Kind {
    /// Objects released together with their parent
    fn is_implicit(self) -> bool {
        matches!(self, Kind::Queue | Kind::SwapchainImage)
    }
}

#[derive(Debug, Clone)]
pub struct MockAdapter {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub present_support: Vec<bool>,
    pub extensions: Vec<String>,
}

impl MockAdapter {
    pub fn new(name: &str, device_type: vk::PhysicalDeviceType) -> Self {
        Self {
            name: name.to_string(),
            device_type,
            queue_families: vec![vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            }],
            present_support: vec![true],
            extensions: vec!["VK_KHR_swapchain".to_string()],
        }
    }
}

/// What the fake driver reports
#[derive(Debug, Clone)]
pub struct MockSettings {
    pub instance_extensions: Vec<String>,
    pub instance_layers: Vec<String>,
    pub adapters: Vec<MockAdapter>,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub image_count: u32,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub memory_type_bits: u32,
    pub row_pitch_alignment: u64,
    /// Overrides the size reported by buffer memory requirements
    pub requirement_size: Option<u64>,
}

impl Default for MockSettings {
    fn default() -> Self {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 1,
            ..Default::default()
        };
        memory_properties.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        memory_properties.memory_types[1] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 0,
        };
        memory_properties.memory_heaps[0] = vk::MemoryHeap {
            size: 256 << 20,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };

        Self {
            instance_extensions: vec![
                "VK_KHR_surface".to_string(),
                "VK_KHR_xcb_surface".to_string(),
                "VK_EXT_debug_utils".to_string(),
            ],
            instance_layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            adapters: vec![MockAdapter::new("Mock Discrete GPU", vk::PhysicalDeviceType::DISCRETE_GPU)],
            surface_formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D { width: 640, height: 480 },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
                max_image_array_layers: 1,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            image_count: 3,
            memory_properties,
            memory_type_bits: 0b11,
            row_pitch_alignment: 64,
            requirement_size: None,
        }
    }
}

const PHYSICAL_DEVICE_BASE: u64 = 0xadad_0000;

struct Object {
    kind: Kind,
    parent: Option<u64>,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    live: HashMap<u64, Object>,
    destroyed: HashSet<u64>,
    calls: Vec<&'static str>,
    violations: Vec<String>,

    fallible: usize,
    fail_at: Option<usize>,
    fail_named: Vec<(&'static str, usize, vk::Result)>,
    invocations: HashMap<&'static str, usize>,

    instance: Option<u64>,
    device: Option<u64>,
    buffers: HashMap<u64, u64>,
    memory: HashMap<u64, Box<[u8]>>,
    mapped: HashSet<u64>,
    images: HashMap<u64, vk::Extent2D>,
    swapchain_images: HashMap<u64, Vec<vk::Image>>,
    next_image: HashMap<u64, u32>,
    fences: HashMap<u64, bool>,
    semaphores: HashMap<u64, bool>,
    /// Images handed out by acquire and not yet given back by present
    acquired: HashMap<u64, Vec<u32>>,

    descriptor_pools: Vec<(u32, Vec<vk::DescriptorPoolSize>)>,
    set_layouts: Vec<Vec<vk::DescriptorSetLayoutBinding>>,
    descriptor_writes: Vec<(vk::DescriptorSet, vk::DescriptorBufferInfo, Vec<vk::DescriptorImageInfo>)>,
    pipelines: Vec<PipelineDesc>,
    recordings: HashMap<u64, DrawRecording>,
    transitions: Vec<LayoutTransition>,
    submissions: Vec<Submission>,
}

impl State {
    /// Log a fallible call and decide whether it fails
    fn enter(&mut self, call: &'static str) -> VkResult<()> {
        self.calls.push(call);
        self.fallible += 1;
        let invocation = {
            let count = self.invocations.entry(call).or_insert(0);
            *count += 1;
            *count
        };

        if self.fail_at == Some(self.fallible) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        if let Some(&(_, _, result)) = self
            .fail_named
            .iter()
            .find(|(name, n, _)| *name == call && *n == invocation)
        {
            return Err(result);
        }
        Ok(())
    }

    fn note(&mut self, call: &'static str) {
        self.calls.push(call);
    }

    fn create<T: Handle>(&mut self, kind: Kind, parent: Option<u64>) -> T {
        self.next_handle += 1;
        let raw = 0x1_0000 + self.next_handle;
        self.live.insert(raw, Object { kind, parent });
        T::from_raw(raw)
    }

    fn check<T: Handle>(&mut self, handle: T, call: &'static str) {
        let raw = handle.as_raw();
        if raw == 0 {
            self.violations.push(format!("{call}: null handle"));
        } else if self.destroyed.contains(&raw) {
            self.violations.push(format!("{call}: use after destroy of {raw:#x}"));
        } else if !self.live.contains_key(&raw) {
            self.violations.push(format!("{call}: unknown handle {raw:#x}"));
        }
    }

    fn destroy<T: Handle>(&mut self, handle: T, call: &'static str) {
        self.note(call);
        self.release(handle.as_raw(), call);
    }

    fn release(&mut self, raw: u64, call: &'static str) {
        if raw == 0 {
            return;
        }
        if self.destroyed.contains(&raw) {
            self.violations.push(format!("{call}: double destroy of {raw:#x}"));
            return;
        }
        let Some(kind) = self.live.get(&raw).map(|o| o.kind) else {
            self.violations.push(format!("{call}: unknown handle {raw:#x}"));
            return;
        };

        let implicit: Vec<u64> = self
            .live
            .iter()
            .filter(|(_, o)| o.parent == Some(raw) && o.kind.is_implicit())
            .map(|(&h, _)| h)
            .collect();
        for child in implicit {
            self.release(child, call);
        }

        let children: Vec<String> = self
            .live
            .iter()
            .filter(|(_, o)| o.parent == Some(raw))
            .map(|(h, o)| format!("{:?} {:#x}", o.kind, h))
            .collect();
        if !children.is_empty() {
            self.violations.push(format!(
                "{call}: {kind:?} {raw:#x} destroyed while children are live: {}",
                children.join(", ")
            ));
        }

        self.live.remove(&raw);
        self.destroyed.insert(raw);
    }

    /// A binary semaphore takes one signal, then exactly one wait
    fn signal_semaphore(&mut self, semaphore: vk::Semaphore, call: &'static str) {
        let raw = semaphore.as_raw();
        if self.semaphores.insert(raw, true) == Some(true) {
            self.violations
                .push(format!("{call}: semaphore {raw:#x} signaled while already signaled"));
        }
    }

    fn wait_semaphore(&mut self, semaphore: vk::Semaphore, call: &'static str) {
        let raw = semaphore.as_raw();
        if self.semaphores.insert(raw, false) != Some(true) {
            self.violations
                .push(format!("{call}: waits on semaphore {raw:#x} that nothing signaled"));
        }
    }

    fn adapter_index(&self, gpu: vk::PhysicalDevice) -> usize {
        gpu.as_raw().wrapping_sub(PHYSICAL_DEVICE_BASE) as usize
    }
}

pub struct MockGpu {
    pub settings: MockSettings,
    state: RefCell<State>,
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new(MockSettings::default())
    }
}

impl MockGpu {
    pub fn new(settings: MockSettings) -> Self {
        Self {
            settings,
            state: RefCell::new(State::default()),
        }
    }

    /// Fail the n-th fallible call (1-based) with ERROR_OUT_OF_DEVICE_MEMORY
    pub fn fail_nth_call(&mut self, n: usize) {
        self.state.get_mut().fail_at = Some(n);
    }

    /// Fail the given invocation (1-based) of a named call
    pub fn fail_call(&mut self, call: &'static str, invocation: usize, result: vk::Result) {
        self.state.get_mut().fail_named.push((call, invocation, result));
    }

    /// Surface creation normally comes from the window system
    pub fn create_surface(&mut self, instance: vk::Instance) -> VkResult<vk::SurfaceKHR> {
        let state = self.state.get_mut();
        state.enter("vkCreateSurfaceKHR")?;
        state.check(instance, "vkCreateSurfaceKHR");
        Ok(state.create(Kind::Surface, Some(instance.as_raw())))
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.borrow().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state.borrow().calls.iter().filter(|c| **c == call).count()
    }

    pub fn fallible_calls(&self) -> usize {
        self.state.borrow().fallible
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn live_objects(&self) -> Vec<Kind> {
        self.state.borrow().live.values().map(|o| o.kind).collect()
    }

    pub fn is_live<T: Handle>(&self, handle: T) -> bool {
        self.state.borrow().live.contains_key(&handle.as_raw())
    }

    pub fn memory_contents(&self, memory: vk::DeviceMemory) -> Vec<u8> {
        self.state
            .borrow()
            .memory
            .get(&memory.as_raw())
            .map(|bytes| bytes.to_vec())
            .unwrap_or_default()
    }

    pub fn descriptor_pools(&self) -> Vec<(u32, Vec<vk::DescriptorPoolSize>)> {
        self.state.borrow().descriptor_pools.clone()
    }

    pub fn set_layouts(&self) -> Vec<Vec<vk::DescriptorSetLayoutBinding>> {
        self.state.borrow().set_layouts.clone()
    }

    pub fn descriptor_writes(&self) -> Vec<(vk::DescriptorSet, vk::DescriptorBufferInfo, Vec<vk::DescriptorImageInfo>)> {
        self.state.borrow().descriptor_writes.clone()
    }

    pub fn pipelines(&self) -> Vec<PipelineDesc> {
        self.state.borrow().pipelines.clone()
    }

    pub fn recording(&self, cmd: vk::CommandBuffer) -> Option<DrawRecording> {
        self.state.borrow().recordings.get(&cmd.as_raw()).copied()
    }

    pub fn transitions(&self) -> Vec<LayoutTransition> {
        self.state.borrow().transitions.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.borrow().submissions.clone()
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> Option<bool> {
        self.state.borrow().fences.get(&fence.as_raw()).copied()
    }

    pub fn semaphore_signaled(&self, semaphore: vk::Semaphore) -> Option<bool> {
        self.state.borrow().semaphores.get(&semaphore.as_raw()).copied()
    }

    /// Image indices the application holds: acquired but not presented
    pub fn acquired_images(&self, swapchain: vk::SwapchainKHR) -> Vec<u32> {
        self.state
            .borrow()
            .acquired
            .get(&swapchain.as_raw())
            .cloned()
            .unwrap_or_default()
    }
}

impl Gpu for MockGpu {
    fn instance_extensions(&self) -> VkResult<Vec<String>> {
        self.state.borrow_mut().enter("vkEnumerateInstanceExtensionProperties")?;
        Ok(self.settings.instance_extensions.clone())
    }

    fn instance_layers(&self) -> VkResult<Vec<String>> {
        self.state.borrow_mut().enter("vkEnumerateInstanceLayerProperties")?;
        Ok(self.settings.instance_layers.clone())
    }

    fn create_instance(&mut self, _app_name: &CStr, _extensions: &[&CStr], _layers: &[&CStr]) -> VkResult<vk::Instance> {
        let state = self.state.get_mut();
        state.enter("vkCreateInstance")?;
        let instance: vk::Instance = state.create(Kind::Instance, None);
        state.instance = Some(instance.as_raw());
        Ok(instance)
    }

    fn destroy_instance(&mut self, instance: vk::Instance) {
        self.state.get_mut().destroy(instance, "vkDestroyInstance");
    }

    fn create_debug_messenger(&mut self, instance: vk::Instance) -> VkResult<vk::DebugUtilsMessengerEXT> {
        let state = self.state.get_mut();
        state.enter("vkCreateDebugUtilsMessengerEXT")?;
        state.check(instance, "vkCreateDebugUtilsMessengerEXT");
        Ok(state.create(Kind::Messenger, Some(instance.as_raw())))
    }

    fn destroy_debug_messenger(&mut self, messenger: vk::DebugUtilsMessengerEXT) {
        self.state.get_mut().destroy(messenger, "vkDestroyDebugUtilsMessengerEXT");
    }

    fn destroy_surface(&mut self, surface: vk::SurfaceKHR) {
        self.state.get_mut().destroy(surface, "vkDestroySurfaceKHR");
    }

    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        self.state.borrow_mut().enter("vkEnumeratePhysicalDevices")?;
        Ok((0..self.settings.adapters.len() as u64)
            .map(|i| vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE + i))
            .collect())
    }

    fn physical_device_properties(&self, gpu: vk::PhysicalDevice) -> VkResult<vk::PhysicalDeviceProperties> {
        let mut state = self.state.borrow_mut();
        state.note("vkGetPhysicalDeviceProperties");
        let adapter = &self.settings.adapters[state.adapter_index(gpu)];

        let mut properties = vk::PhysicalDeviceProperties {
            device_type: adapter.device_type,
            api_version: vk::API_VERSION_1_2,
            ..Default::default()
        };
        for (dst, src) in properties.device_name.iter_mut().zip(adapter.name.bytes()) {
            *dst = src as std::ffi::c_char;
        }
        Ok(properties)
    }

    fn queue_family_properties(&self, gpu: vk::PhysicalDevice) -> VkResult<Vec<vk::QueueFamilyProperties>> {
        let mut state = self.state.borrow_mut();
        state.note("vkGetPhysicalDeviceQueueFamilyProperties");
        Ok(self.settings.adapters[state.adapter_index(gpu)].queue_families.clone())
    }

    fn memory_properties(&self, _gpu: vk::PhysicalDevice) -> VkResult<vk::PhysicalDeviceMemoryProperties> {
        self.state.borrow_mut().note("vkGetPhysicalDeviceMemoryProperties");
        Ok(self.settings.memory_properties)
    }

    fn device_extensions(&self, gpu: vk::PhysicalDevice) -> VkResult<Vec<String>> {
        let mut state = self.state.borrow_mut();
        state.enter("vkEnumerateDeviceExtensionProperties")?;
        Ok(self.settings.adapters[state.adapter_index(gpu)].extensions.clone())
    }

    fn surface_support(&self, gpu: vk::PhysicalDevice, queue_family: u32, surface: vk::SurfaceKHR) -> VkResult<bool> {
        let mut state = self.state.borrow_mut();
        state.enter("vkGetPhysicalDeviceSurfaceSupportKHR")?;
        state.check(surface, "vkGetPhysicalDeviceSurfaceSupportKHR");
        let adapter = &self.settings.adapters[state.adapter_index(gpu)];
        Ok(adapter
            .present_support
            .get(queue_family as usize)
            .copied()
            .unwrap_or(false))
    }

    fn create_device(&mut self, _gpu: vk::PhysicalDevice, _queue_family: u32, _extensions: &[&CStr]) -> VkResult<vk::Device> {
        let state = self.state.get_mut();
        state.enter("vkCreateDevice")?;
        let parent = state.instance;
        let device: vk::Device = state.create(Kind::Device, parent);
        state.device = Some(device.as_raw());
        Ok(device)
    }

    fn destroy_device(&mut self, device: vk::Device) {
        self.state.get_mut().destroy(device, "vkDestroyDevice");
    }

    fn device_queue(&self, _queue_family: u32, _index: u32) -> VkResult<vk::Queue> {
        let mut state = self.state.borrow_mut();
        state.note("vkGetDeviceQueue");
        let parent = state.device;
        Ok(state.create(Kind::Queue, parent))
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        self.state.borrow_mut().enter("vkDeviceWaitIdle")
    }

    fn surface_capabilities(&self, _gpu: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let mut state = self.state.borrow_mut();
        state.enter("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        state.check(surface, "vkGetPhysicalDeviceSurfaceCapabilitiesKHR");
        Ok(self.settings.capabilities)
    }

    fn surface_formats(&self, _gpu: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        let mut state = self.state.borrow_mut();
        state.enter("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        state.check(surface, "vkGetPhysicalDeviceSurfaceFormatsKHR");
        Ok(self.settings.surface_formats.clone())
    }

    fn surface_present_modes(&self, _gpu: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::PresentModeKHR>> {
        let mut state = self.state.borrow_mut();
        state.enter("vkGetPhysicalDeviceSurfacePresentModesKHR")?;
        state.check(surface, "vkGetPhysicalDeviceSurfacePresentModesKHR");
        Ok(self.settings.present_modes.clone())
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let image_count = self.settings.image_count;
        let state = self.state.get_mut();
        state.enter("vkCreateSwapchainKHR")?;
        state.check(desc.surface, "vkCreateSwapchainKHR");

        let parent = state.device;
        let swapchain: vk::SwapchainKHR = state.create(Kind::Swapchain, parent);
        let images: Vec<vk::Image> = (0..image_count)
            .map(|_| state.create(Kind::SwapchainImage, Some(swapchain.as_raw())))
            .collect();
        for image in &images {
            state.images.insert(image.as_raw(), desc.extent);
        }
        state.swapchain_images.insert(swapchain.as_raw(), images);
        state.next_image.insert(swapchain.as_raw(), 0);
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut state = self.state.borrow_mut();
        state.enter("vkGetSwapchainImagesKHR")?;
        state.check(swapchain, "vkGetSwapchainImagesKHR");
        Ok(state.swapchain_images.get(&swapchain.as_raw()).cloned().unwrap_or_default())
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        self.state.get_mut().destroy(swapchain, "vkDestroySwapchainKHR");
    }

    fn acquire_next_image(&mut self, swapchain: vk::SwapchainKHR, _timeout: u64, signal: vk::Semaphore) -> VkResult<u32> {
        let min_images = self.settings.capabilities.min_image_count;
        let state = self.state.get_mut();
        state.enter("vkAcquireNextImageKHR")?;
        state.check(swapchain, "vkAcquireNextImageKHR");
        state.check(signal, "vkAcquireNextImageKHR");

        let raw = swapchain.as_raw();
        let count = state
            .swapchain_images
            .get(&raw)
            .map_or(1, |images| images.len().max(1) as u32);
        let held = state.acquired.get(&raw).cloned().unwrap_or_default();

        // Past this many held images an infinite-timeout acquire never returns
        let limit = (count + 1).saturating_sub(min_images).max(1) as usize;
        if held.len() >= limit {
            state.violations.push(format!(
                "vkAcquireNextImageKHR: {} image(s) already held, acquire would block forever",
                held.len()
            ));
            return Err(vk::Result::TIMEOUT);
        }

        let next = state.next_image.entry(raw).or_insert(0);
        let mut index = *next;
        while held.contains(&index) {
            index = (index + 1) % count;
        }
        *next = (index + 1) % count;

        state.signal_semaphore(signal, "vkAcquireNextImageKHR");
        state.acquired.entry(raw).or_default().push(index);
        Ok(index)
    }

    fn queue_present(&mut self, queue: vk::Queue, swapchain: vk::SwapchainKHR, image_index: u32, wait: Option<vk::Semaphore>) -> VkResult<()> {
        let state = self.state.get_mut();
        // A rejected present is still enqueued: the wait runs and the image goes back
        let result = state.enter("vkQueuePresentKHR");
        state.check(queue, "vkQueuePresentKHR");
        state.check(swapchain, "vkQueuePresentKHR");
        if let Some(semaphore) = wait {
            state.check(semaphore, "vkQueuePresentKHR");
            state.wait_semaphore(semaphore, "vkQueuePresentKHR");
        }
        let count = state.swapchain_images.get(&swapchain.as_raw()).map_or(0, Vec::len);
        if image_index as usize >= count {
            state
                .violations
                .push(format!("vkQueuePresentKHR: image index {image_index} out of {count}"));
        }

        let held = state.acquired.entry(swapchain.as_raw()).or_default();
        match held.iter().position(|&i| i == image_index) {
            Some(position) => {
                held.remove(position);
            }
            None => state
                .violations
                .push(format!("vkQueuePresentKHR: image {image_index} was not acquired")),
        }
        result
    }

    fn create_buffer(&mut self, size: vk::DeviceSize, _usage: vk::BufferUsageFlags) -> VkResult<vk::Buffer> {
        let state = self.state.get_mut();
        state.enter("vkCreateBuffer")?;
        let parent = state.device;
        let buffer: vk::Buffer = state.create(Kind::Buffer, parent);
        state.buffers.insert(buffer.as_raw(), size);
        Ok(buffer)
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> VkResult<vk::MemoryRequirements> {
        let mut state = self.state.borrow_mut();
        state.note("vkGetBufferMemoryRequirements");
        state.check(buffer, "vkGetBufferMemoryRequirements");
        let size = state.buffers.get(&buffer.as_raw()).copied().unwrap_or(0);
        Ok(vk::MemoryRequirements {
            size: self.settings.requirement_size.unwrap_or((size + 15) & !15),
            alignment: 16,
            memory_type_bits: self.settings.memory_type_bits,
        })
    }

    fn bind_buffer_memory(&mut self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VkResult<()> {
        let state = self.state.get_mut();
        state.enter("vkBindBufferMemory")?;
        state.check(buffer, "vkBindBufferMemory");
        state.check(memory, "vkBindBufferMemory");
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        self.state.get_mut().destroy(buffer, "vkDestroyBuffer");
    }

    fn allocate_memory(&mut self, size: vk::DeviceSize, memory_type_index: u32) -> VkResult<vk::DeviceMemory> {
        let type_count = self.settings.memory_properties.memory_type_count;
        let state = self.state.get_mut();
        state.enter("vkAllocateMemory")?;
        if memory_type_index >= type_count {
            state
                .violations
                .push(format!("vkAllocateMemory: memory type {memory_type_index} out of {type_count}"));
        }
        let parent = state.device;
        let memory: vk::DeviceMemory = state.create(Kind::Memory, parent);
        state
            .memory
            .insert(memory.as_raw(), vec![0u8; size as usize].into_boxed_slice());
        Ok(memory)
    }

    fn map_memory(&mut self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> VkResult<*mut u8> {
        let state = self.state.get_mut();
        state.enter("vkMapMemory")?;
        state.check(memory, "vkMapMemory");

        let raw = memory.as_raw();
        if !state.mapped.insert(raw) {
            state.violations.push(format!("vkMapMemory: {raw:#x} is already mapped"));
        }
        let Some(bytes) = state.memory.get_mut(&raw) else {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        };
        let len = bytes.len() as u64;
        let end = if size == vk::WHOLE_SIZE { len } else { offset + size };
        if offset > len || end > len {
            state
                .violations
                .push(format!("vkMapMemory: range {offset}..{end} exceeds allocation of {len}"));
            state.mapped.remove(&raw);
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        Ok(bytes[offset as usize..].as_mut_ptr())
    }

    fn unmap_memory(&mut self, memory: vk::DeviceMemory) {
        let state = self.state.get_mut();
        state.note("vkUnmapMemory");
        state.check(memory, "vkUnmapMemory");
        if !state.mapped.remove(&memory.as_raw()) {
            state
                .violations
                .push(format!("vkUnmapMemory: {:#x} is not mapped", memory.as_raw()));
        }
    }

    fn free_memory(&mut self, memory: vk::DeviceMemory) {
        let state = self.state.get_mut();
        if state.mapped.contains(&memory.as_raw()) {
            state
                .violations
                .push(format!("vkFreeMemory: {:#x} freed while mapped", memory.as_raw()));
        }
        state.destroy(memory, "vkFreeMemory");
    }

    fn create_texture_image(&mut self, extent: vk::Extent2D, _format: vk::Format) -> VkResult<vk::Image> {
        let state = self.state.get_mut();
        state.enter("vkCreateImage")?;
        let parent = state.device;
        let image: vk::Image = state.create(Kind::Image, parent);
        state.images.insert(image.as_raw(), extent);
        Ok(image)
    }

    fn image_memory_requirements(&self, image: vk::Image) -> VkResult<vk::MemoryRequirements> {
        let mut state = self.state.borrow_mut();
        state.note("vkGetImageMemoryRequirements");
        state.check(image, "vkGetImageMemoryRequirements");
        let extent = state.images.get(&image.as_raw()).copied().unwrap_or_default();
        let pitch = align(extent.width as u64 * 4, self.settings.row_pitch_alignment);
        Ok(vk::MemoryRequirements {
            size: pitch * extent.height as u64,
            alignment: 256,
            memory_type_bits: self.settings.memory_type_bits,
        })
    }

    fn bind_image_memory(&mut self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        let state = self.state.get_mut();
        state.enter("vkBindImageMemory")?;
        state.check(image, "vkBindImageMemory");
        state.check(memory, "vkBindImageMemory");
        Ok(())
    }

    fn image_row_pitch(&self, image: vk::Image) -> VkResult<vk::DeviceSize> {
        let mut state = self.state.borrow_mut();
        state.note("vkGetImageSubresourceLayout");
        state.check(image, "vkGetImageSubresourceLayout");
        let extent = state.images.get(&image.as_raw()).copied().unwrap_or_default();
        Ok(align(extent.width as u64 * 4, self.settings.row_pitch_alignment))
    }

    fn destroy_image(&mut self, image: vk::Image) {
        self.state.get_mut().destroy(image, "vkDestroyImage");
    }

    fn create_image_view(&mut self, image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        let state = self.state.get_mut();
        state.enter("vkCreateImageView")?;
        state.check(image, "vkCreateImageView");
        Ok(state.create(Kind::ImageView, Some(image.as_raw())))
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        self.state.get_mut().destroy(view, "vkDestroyImageView");
    }

    fn create_sampler(&mut self) -> VkResult<vk::Sampler> {
        let state = self.state.get_mut();
        state.enter("vkCreateSampler")?;
        let parent = state.device;
        Ok(state.create(Kind::Sampler, parent))
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        self.state.get_mut().destroy(sampler, "vkDestroySampler");
    }

    fn create_descriptor_set_layout(&mut self, bindings: &[vk::DescriptorSetLayoutBinding]) -> VkResult<vk::DescriptorSetLayout> {
        let state = self.state.get_mut();
        state.enter("vkCreateDescriptorSetLayout")?;
        state.set_layouts.push(bindings.to_vec());
        let parent = state.device;
        Ok(state.create(Kind::SetLayout, parent))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        self.state.get_mut().destroy(layout, "vkDestroyDescriptorSetLayout");
    }

    fn create_descriptor_pool(&mut self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool> {
        let state = self.state.get_mut();
        state.enter("vkCreateDescriptorPool")?;
        state.descriptor_pools.push((max_sets, sizes.to_vec()));
        let parent = state.device;
        Ok(state.create(Kind::DescriptorPool, parent))
    }

    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool) {
        self.state.get_mut().destroy(pool, "vkDestroyDescriptorPool");
    }

    fn allocate_descriptor_set(&mut self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> VkResult<vk::DescriptorSet> {
        let state = self.state.get_mut();
        state.enter("vkAllocateDescriptorSets")?;
        state.check(pool, "vkAllocateDescriptorSets");
        state.check(layout, "vkAllocateDescriptorSets");
        Ok(state.create(Kind::DescriptorSet, Some(pool.as_raw())))
    }

    fn write_descriptor_set(&mut self, set: vk::DescriptorSet, uniform: vk::DescriptorBufferInfo, images: &[vk::DescriptorImageInfo]) {
        let state = self.state.get_mut();
        state.note("vkUpdateDescriptorSets");
        state.check(set, "vkUpdateDescriptorSets");
        state.check(uniform.buffer, "vkUpdateDescriptorSets");
        for info in images {
            state.check(info.image_view, "vkUpdateDescriptorSets");
            state.check(info.sampler, "vkUpdateDescriptorSets");
        }
        state.descriptor_writes.push((set, uniform, images.to_vec()));
    }

    fn free_descriptor_sets(&mut self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) {
        let state = self.state.get_mut();
        state.note("vkFreeDescriptorSets");
        state.check(pool, "vkFreeDescriptorSets");
        for set in sets {
            state.release(set.as_raw(), "vkFreeDescriptorSets");
        }
    }

    fn create_render_pass(&mut self, _format: vk::Format) -> VkResult<vk::RenderPass> {
        let state = self.state.get_mut();
        state.enter("vkCreateRenderPass")?;
        let parent = state.device;
        Ok(state.create(Kind::RenderPass, parent))
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.state.get_mut().destroy(render_pass, "vkDestroyRenderPass");
    }

    fn create_framebuffer(&mut self, render_pass: vk::RenderPass, view: vk::ImageView, _extent: vk::Extent2D) -> VkResult<vk::Framebuffer> {
        let state = self.state.get_mut();
        state.enter("vkCreateFramebuffer")?;
        state.check(render_pass, "vkCreateFramebuffer");
        state.check(view, "vkCreateFramebuffer");
        Ok(state.create(Kind::Framebuffer, Some(view.as_raw())))
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.state.get_mut().destroy(framebuffer, "vkDestroyFramebuffer");
    }

    fn create_shader_module(&mut self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let state = self.state.get_mut();
        state.enter("vkCreateShaderModule")?;
        if code.is_empty() {
            state.violations.push("vkCreateShaderModule: empty code".to_string());
        }
        let parent = state.device;
        Ok(state.create(Kind::ShaderModule, parent))
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        self.state.get_mut().destroy(module, "vkDestroyShaderModule");
    }

    fn create_pipeline_layout(&mut self, set_layout: vk::DescriptorSetLayout) -> VkResult<vk::PipelineLayout> {
        let state = self.state.get_mut();
        state.enter("vkCreatePipelineLayout")?;
        state.check(set_layout, "vkCreatePipelineLayout");
        let parent = state.device;
        Ok(state.create(Kind::PipelineLayout, parent))
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        self.state.get_mut().destroy(layout, "vkDestroyPipelineLayout");
    }

    fn create_pipeline_cache(&mut self) -> VkResult<vk::PipelineCache> {
        let state = self.state.get_mut();
        state.enter("vkCreatePipelineCache")?;
        let parent = state.device;
        Ok(state.create(Kind::PipelineCache, parent))
    }

    fn destroy_pipeline_cache(&mut self, cache: vk::PipelineCache) {
        self.state.get_mut().destroy(cache, "vkDestroyPipelineCache");
    }

    fn create_graphics_pipeline(&mut self, cache: vk::PipelineCache, desc: &PipelineDesc) -> VkResult<vk::Pipeline> {
        let state = self.state.get_mut();
        state.enter("vkCreateGraphicsPipelines")?;
        state.check(cache, "vkCreateGraphicsPipelines");
        state.check(desc.render_pass, "vkCreateGraphicsPipelines");
        state.check(desc.layout, "vkCreateGraphicsPipelines");
        state.check(desc.vertex_shader, "vkCreateGraphicsPipelines");
        state.check(desc.fragment_shader, "vkCreateGraphicsPipelines");
        state.pipelines.push(desc.clone());
        let parent = state.device;
        Ok(state.create(Kind::Pipeline, parent))
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.state.get_mut().destroy(pipeline, "vkDestroyPipeline");
    }

    fn create_command_pool(&mut self, _queue_family: u32) -> VkResult<vk::CommandPool> {
        let state = self.state.get_mut();
        state.enter("vkCreateCommandPool")?;
        let parent = state.device;
        Ok(state.create(Kind::CommandPool, parent))
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        self.state.get_mut().destroy(pool, "vkDestroyCommandPool");
    }

    fn allocate_command_buffers(&mut self, pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let state = self.state.get_mut();
        state.enter("vkAllocateCommandBuffers")?;
        state.check(pool, "vkAllocateCommandBuffers");
        Ok((0..count)
            .map(|_| state.create(Kind::CommandBuffer, Some(pool.as_raw())))
            .collect())
    }

    fn free_command_buffers(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let state = self.state.get_mut();
        state.note("vkFreeCommandBuffers");
        state.check(pool, "vkFreeCommandBuffers");
        for buffer in buffers {
            state.release(buffer.as_raw(), "vkFreeCommandBuffers");
        }
    }

    fn record_draw(&mut self, cmd: vk::CommandBuffer, draw: &DrawRecording) -> VkResult<()> {
        let state = self.state.get_mut();
        state.enter("vkBeginCommandBuffer")?;
        state.check(cmd, "vkBeginCommandBuffer");
        state.check(draw.render_pass, "vkCmdBeginRenderPass");
        state.check(draw.framebuffer, "vkCmdBeginRenderPass");
        state.check(draw.pipeline, "vkCmdBindPipeline");
        state.check(draw.descriptor_set, "vkCmdBindDescriptorSets");
        state.check(draw.vertex_buffer, "vkCmdBindVertexBuffers");
        state.check(draw.index_buffer, "vkCmdBindIndexBuffer");
        state.recordings.insert(cmd.as_raw(), *draw);
        Ok(())
    }

    fn record_layout_transition(&mut self, cmd: vk::CommandBuffer, transition: &LayoutTransition) -> VkResult<()> {
        let state = self.state.get_mut();
        state.enter("vkBeginCommandBuffer")?;
        state.check(cmd, "vkBeginCommandBuffer");
        state.check(transition.image, "vkCmdPipelineBarrier");
        state.transitions.push(*transition);
        Ok(())
    }

    fn create_fence(&mut self, signaled: bool) -> VkResult<vk::Fence> {
        let state = self.state.get_mut();
        state.enter("vkCreateFence")?;
        let parent = state.device;
        let fence: vk::Fence = state.create(Kind::Fence, parent);
        state.fences.insert(fence.as_raw(), signaled);
        Ok(fence)
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        self.state.get_mut().destroy(fence, "vkDestroyFence");
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VkResult<()> {
        let state = self.state.get_mut();
        state.enter("vkResetFences")?;
        state.check(fence, "vkResetFences");
        state.fences.insert(fence.as_raw(), false);
        Ok(())
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let state = self.state.get_mut();
        state.enter("vkWaitForFences")?;
        state.check(fence, "vkWaitForFences");
        // Nothing pending will ever signal an unsignaled fence here
        match state.fences.get(&fence.as_raw()) {
            Some(true) => Ok(()),
            _ => Err(vk::Result::TIMEOUT),
        }
    }

    fn create_semaphore(&mut self) -> VkResult<vk::Semaphore> {
        let state = self.state.get_mut();
        state.enter("vkCreateSemaphore")?;
        let parent = state.device;
        let semaphore: vk::Semaphore = state.create(Kind::Semaphore, parent);
        state.semaphores.insert(semaphore.as_raw(), false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.state.get_mut().destroy(semaphore, "vkDestroySemaphore");
    }

    fn queue_submit(&mut self, queue: vk::Queue, submission: &Submission, fence: vk::Fence) -> VkResult<()> {
        let state = self.state.get_mut();
        state.enter("vkQueueSubmit")?;
        state.check(queue, "vkQueueSubmit");
        state.check(submission.command_buffer, "vkQueueSubmit");
        if let Some((semaphore, _)) = submission.wait {
            state.check(semaphore, "vkQueueSubmit");
            state.wait_semaphore(semaphore, "vkQueueSubmit");
        }
        if let Some(semaphore) = submission.signal {
            state.check(semaphore, "vkQueueSubmit");
            state.signal_semaphore(semaphore, "vkQueueSubmit");
        }
        if fence != vk::Fence::null() {
            state.check(fence, "vkQueueSubmit");
            if state.fences.get(&fence.as_raw()) == Some(&true) {
                state
                    .violations
                    .push(format!("vkQueueSubmit: fence {:#x} is still signaled", fence.as_raw()));
            }
            // Work completes immediately
            state.fences.insert(fence.as_raw(), true);
        }
        state.submissions.push(*submission);
        Ok(())
    }
}

fn align(value: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_destroyed_before_child_is_flagged() {
        let mut gpu = MockGpu::default();
        let instance = gpu.create_instance(c"test", &[], &[]).unwrap();
        let device = gpu.create_device(vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE), 0, &[]).unwrap();
        let pool = gpu.create_command_pool(0).unwrap();

        gpu.destroy_device(device);
        gpu.destroy_command_pool(pool);
        gpu.destroy_instance(instance);

        let violations = gpu.violations();
        assert_eq!(violations.len(), 1, "{:?}", violations);
        assert!(violations[0].starts_with("vkDestroyDevice"));
        assert!(gpu.live_objects().is_empty());
    }

    #[test]
    fn double_destroy_and_use_after_destroy_are_flagged() {
        let mut gpu = MockGpu::default();
        let _instance = gpu.create_instance(c"test", &[], &[]).unwrap();
        let _device = gpu.create_device(vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE), 0, &[]).unwrap();
        let fence = gpu.create_fence(true).unwrap();

        gpu.destroy_fence(fence);
        gpu.destroy_fence(fence);
        let _ = gpu.wait_for_fence(fence, 0);

        let violations = gpu.violations();
        assert!(violations.iter().any(|v| v.contains("double destroy")));
        assert!(violations.iter().any(|v| v.contains("use after destroy")));
    }

    #[test]
    fn injected_failures_hit_the_requested_call() {
        let mut gpu = MockGpu::default();
        gpu.fail_call("vkCreateFence", 2, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let _instance = gpu.create_instance(c"test", &[], &[]).unwrap();
        let _device = gpu.create_device(vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE), 0, &[]).unwrap();

        assert!(gpu.create_fence(false).is_ok());
        assert_eq!(gpu.create_fence(false), Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        assert!(gpu.create_fence(false).is_ok());

        let mut gpu = MockGpu::default();
        gpu.fail_nth_call(1);
        assert!(gpu.create_instance(c"test", &[], &[]).is_err());
        assert_eq!(gpu.fallible_calls(), 1);
    }

    #[test]
    fn semaphores_take_one_signal_then_one_wait() {
        let mut gpu = MockGpu::default();
        let _instance = gpu.create_instance(c"test", &[], &[]).unwrap();
        let _device = gpu.create_device(vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE), 0, &[]).unwrap();
        let queue = gpu.device_queue(0, 0).unwrap();
        let pool = gpu.create_command_pool(0).unwrap();
        let cmd = gpu.allocate_command_buffers(pool, 1).unwrap()[0];
        let semaphore = gpu.create_semaphore().unwrap();
        assert_eq!(gpu.semaphore_signaled(semaphore), Some(false));

        let waiting = Submission {
            command_buffer: cmd,
            wait: Some((semaphore, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)),
            signal: None,
        };
        let signalling = Submission {
            command_buffer: cmd,
            wait: None,
            signal: Some(semaphore),
        };

        gpu.queue_submit(queue, &signalling, vk::Fence::null()).unwrap();
        gpu.queue_submit(queue, &waiting, vk::Fence::null()).unwrap();
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
        assert_eq!(gpu.semaphore_signaled(semaphore), Some(false));

        gpu.queue_submit(queue, &waiting, vk::Fence::null()).unwrap();
        gpu.queue_submit(queue, &signalling, vk::Fence::null()).unwrap();
        gpu.queue_submit(queue, &signalling, vk::Fence::null()).unwrap();
        let violations = gpu.violations();
        assert_eq!(violations.len(), 2, "{:?}", violations);
        assert!(violations[0].contains("nothing signaled"));
        assert!(violations[1].contains("already signaled"));
    }

    #[test]
    fn failed_submit_leaves_semaphores_untouched() {
        let mut gpu = MockGpu::default();
        let _instance = gpu.create_instance(c"test", &[], &[]).unwrap();
        let _device = gpu.create_device(vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE), 0, &[]).unwrap();
        let queue = gpu.device_queue(0, 0).unwrap();
        let pool = gpu.create_command_pool(0).unwrap();
        let cmd = gpu.allocate_command_buffers(pool, 1).unwrap()[0];
        let semaphore = gpu.create_semaphore().unwrap();
        gpu.fail_call("vkQueueSubmit", 1, vk::Result::ERROR_DEVICE_LOST);

        let submission = Submission {
            command_buffer: cmd,
            wait: None,
            signal: Some(semaphore),
        };
        assert!(gpu.queue_submit(queue, &submission, vk::Fence::null()).is_err());
        assert_eq!(gpu.semaphore_signaled(semaphore), Some(false));
    }

    #[test]
    fn mapped_memory_is_backed_by_host_bytes() {
        let mut gpu = MockGpu::default();
        let _instance = gpu.create_instance(c"test", &[], &[]).unwrap();
        let _device = gpu.create_device(vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE), 0, &[]).unwrap();
        let memory = gpu.allocate_memory(8, 1).unwrap();

        let ptr = gpu.map_memory(memory, 0, 8).unwrap();
        unsafe { std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), ptr.add(2), 4) };
        gpu.unmap_memory(memory);

        assert_eq!(gpu.memory_contents(memory), vec![0, 0, 1, 2, 3, 4, 0, 0]);
        gpu.free_memory(memory);
        assert!(gpu.violations().is_empty());
    }
}

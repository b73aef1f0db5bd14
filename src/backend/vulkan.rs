// ash-backed implementation of the `Gpu` capability interface
//
// Holds the loaded entry points plus the function tables that hang off the
// instance and the device. Handles passed in are trusted to belong to the
// instance/device this struct created.

use ash::extensions::{ext, khr};
use ash::prelude::VkResult;
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr};

use super::gpu::{DrawRecording, Gpu, LayoutTransition, PipelineDesc, Submission, SwapchainDesc};

pub struct VulkanGpu {
    entry: Entry,
    instance: Option<ash::Instance>,
    surface_loader: Option<khr::Surface>,
    debug_utils: Option<ext::DebugUtils>,
    device: Option<ash::Device>,
    swapchain_loader: Option<khr::Swapchain>,
}

impl VulkanGpu {
    /// Load the Vulkan library
    pub fn load() -> anyhow::Result<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| anyhow::anyhow!("Failed to load Vulkan library ({e}). Is Vulkan installed?"))?;

        Ok(Self {
            entry,
            instance: None,
            surface_loader: None,
            debug_utils: None,
            device: None,
            swapchain_loader: None,
        })
    }

    /// Instance extensions the window system needs for presentation
    pub fn required_extensions(display: RawDisplayHandle) -> VkResult<Vec<&'static CStr>> {
        let names: &'static [*const c_char] = ash_window::enumerate_required_extensions(display)?;
        Ok(names
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) })
            .collect())
    }

    /// The platform "create surface" capability handed to bootstrap
    pub fn create_window_surface(
        &self,
        instance: vk::Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> VkResult<vk::SurfaceKHR> {
        let ash_instance = self.instance_for(instance)?;
        unsafe { ash_window::create_surface(&self.entry, ash_instance, display, window, None) }
    }

    fn instance_for(&self, handle: vk::Instance) -> VkResult<&ash::Instance> {
        match &self.instance {
            Some(instance) if instance.handle() == handle => Ok(instance),
            _ => Err(vk::Result::ERROR_INITIALIZATION_FAILED),
        }
    }

    fn instance(&self) -> VkResult<&ash::Instance> {
        self.instance.as_ref().ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    fn device(&self) -> VkResult<&ash::Device> {
        self.device.as_ref().ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    fn surface_loader(&self) -> VkResult<&khr::Surface> {
        self.surface_loader.as_ref().ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    fn swapchain_loader(&self) -> VkResult<&khr::Swapchain> {
        self.swapchain_loader.as_ref().ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }
}

fn extension_names(properties: &[vk::ExtensionProperties]) -> Vec<String> {
    properties
        .iter()
        .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }.to_string_lossy().into_owned())
        .collect()
}

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

impl Gpu for VulkanGpu {
    fn instance_extensions(&self) -> VkResult<Vec<String>> {
        let properties = self.entry.enumerate_instance_extension_properties(None)?;
        Ok(extension_names(&properties))
    }

    fn instance_layers(&self) -> VkResult<Vec<String>> {
        let layers = self.entry.enumerate_instance_layer_properties()?;
        Ok(layers
            .iter()
            .map(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) }.to_string_lossy().into_owned())
            .collect())
    }

    fn create_instance(
        &mut self,
        app_name: &CStr,
        extensions: &[&CStr],
        layers: &[&CStr],
    ) -> VkResult<vk::Instance> {
        let app_info = vk::ApplicationInfo::builder()
            .application_name(app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"vk-samples")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { self.entry.create_instance(&create_info, None) }?;
        let handle = instance.handle();

        self.surface_loader = Some(khr::Surface::new(&self.entry, &instance));
        self.instance = Some(instance);
        Ok(handle)
    }

    fn destroy_instance(&mut self, instance: vk::Instance) {
        if self.instance_for(instance).is_err() {
            return;
        }
        self.surface_loader = None;
        self.debug_utils = None;
        if let Some(instance) = self.instance.take() {
            unsafe { instance.destroy_instance(None) };
        }
    }

    fn create_debug_messenger(&mut self, instance: vk::Instance) -> VkResult<vk::DebugUtilsMessengerEXT> {
        let debug_utils = ext::DebugUtils::new(&self.entry, self.instance_for(instance)?);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;
        self.debug_utils = Some(debug_utils);
        Ok(messenger)
    }

    fn destroy_debug_messenger(&mut self, messenger: vk::DebugUtilsMessengerEXT) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe { debug_utils.destroy_debug_utils_messenger(messenger, None) };
        }
    }

    fn destroy_surface(&mut self, surface: vk::SurfaceKHR) {
        if let Some(loader) = &self.surface_loader {
            unsafe { loader.destroy_surface(surface, None) };
        }
    }

    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        unsafe { self.instance()?.enumerate_physical_devices() }
    }

    fn physical_device_properties(&self, gpu: vk::PhysicalDevice) -> VkResult<vk::PhysicalDeviceProperties> {
        Ok(unsafe { self.instance()?.get_physical_device_properties(gpu) })
    }

    fn queue_family_properties(&self, gpu: vk::PhysicalDevice) -> VkResult<Vec<vk::QueueFamilyProperties>> {
        Ok(unsafe { self.instance()?.get_physical_device_queue_family_properties(gpu) })
    }

    fn memory_properties(&self, gpu: vk::PhysicalDevice) -> VkResult<vk::PhysicalDeviceMemoryProperties> {
        Ok(unsafe { self.instance()?.get_physical_device_memory_properties(gpu) })
    }

    fn device_extensions(&self, gpu: vk::PhysicalDevice) -> VkResult<Vec<String>> {
        let properties = unsafe { self.instance()?.enumerate_device_extension_properties(gpu) }?;
        Ok(extension_names(&properties))
    }

    fn surface_support(&self, gpu: vk::PhysicalDevice, queue_family: u32, surface: vk::SurfaceKHR) -> VkResult<bool> {
        unsafe { self.surface_loader()?.get_physical_device_surface_support(gpu, queue_family, surface) }
    }

    fn create_device(
        &mut self,
        gpu: vk::PhysicalDevice,
        queue_family: u32,
        extensions: &[&CStr],
    ) -> VkResult<vk::Device> {
        let instance = self.instance()?;

        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extension_ptrs);

        let device = unsafe { instance.create_device(gpu, &create_info, None) }?;
        let handle = device.handle();
        let swapchain_loader = khr::Swapchain::new(instance, &device);

        self.swapchain_loader = Some(swapchain_loader);
        self.device = Some(device);
        Ok(handle)
    }

    fn destroy_device(&mut self, device: vk::Device) {
        match &self.device {
            Some(d) if d.handle() == device => {}
            _ => return,
        }
        self.swapchain_loader = None;
        if let Some(device) = self.device.take() {
            unsafe { device.destroy_device(None) };
        }
    }

    fn device_queue(&self, queue_family: u32, index: u32) -> VkResult<vk::Queue> {
        Ok(unsafe { self.device()?.get_device_queue(queue_family, index) })
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.device()?.device_wait_idle() }
    }

    fn surface_capabilities(&self, gpu: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe { self.surface_loader()?.get_physical_device_surface_capabilities(gpu, surface) }
    }

    fn surface_formats(&self, gpu: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe { self.surface_loader()?.get_physical_device_surface_formats(gpu, surface) }
    }

    fn surface_present_modes(&self, gpu: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe { self.surface_loader()?.get_physical_device_surface_present_modes(gpu, surface) }
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(desc.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.format.format)
            .image_color_space(desc.format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true);

        unsafe { self.swapchain_loader()?.create_swapchain(&create_info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader()?.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        if let Some(loader) = &self.swapchain_loader {
            unsafe { loader.destroy_swapchain(swapchain, None) };
        }
    }

    fn acquire_next_image(&mut self, swapchain: vk::SwapchainKHR, timeout: u64, signal: vk::Semaphore) -> VkResult<u32> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader()?
                .acquire_next_image(swapchain, timeout, signal, vk::Fence::null())
        }?;
        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(index)
    }

    fn queue_present(
        &mut self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: Option<vk::Semaphore>,
    ) -> VkResult<()> {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader()?.queue_present(queue, &present_info) }?;
        Ok(())
    }

    fn create_buffer(&mut self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VkResult<vk::Buffer> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        unsafe { self.device()?.create_buffer(&buffer_info, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> VkResult<vk::MemoryRequirements> {
        Ok(unsafe { self.device()?.get_buffer_memory_requirements(buffer) })
    }

    fn bind_buffer_memory(&mut self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VkResult<()> {
        unsafe { self.device()?.bind_buffer_memory(buffer, memory, 0) }
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_buffer(buffer, None) };
        }
    }

    fn allocate_memory(&mut self, size: vk::DeviceSize, memory_type_index: u32) -> VkResult<vk::DeviceMemory> {
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        unsafe { self.device()?.allocate_memory(&alloc_info, None) }
    }

    fn map_memory(&mut self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> VkResult<*mut u8> {
        let ptr = unsafe {
            self.device()?
                .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
        }?;
        Ok(ptr.cast())
    }

    fn unmap_memory(&mut self, memory: vk::DeviceMemory) {
        if let Ok(device) = self.device() {
            unsafe { device.unmap_memory(memory) };
        }
    }

    fn free_memory(&mut self, memory: vk::DeviceMemory) {
        if let Ok(device) = self.device() {
            unsafe { device.free_memory(memory, None) };
        }
    }

    fn create_texture_image(&mut self, extent: vk::Extent2D, format: vk::Format) -> VkResult<vk::Image> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::LINEAR)
            .usage(vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::PREINITIALIZED);

        unsafe { self.device()?.create_image(&image_info, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> VkResult<vk::MemoryRequirements> {
        Ok(unsafe { self.device()?.get_image_memory_requirements(image) })
    }

    fn bind_image_memory(&mut self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        unsafe { self.device()?.bind_image_memory(image, memory, 0) }
    }

    fn image_row_pitch(&self, image: vk::Image) -> VkResult<vk::DeviceSize> {
        let subresource = vk::ImageSubresource {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            array_layer: 0,
        };
        let layout = unsafe { self.device()?.get_image_subresource_layout(image, subresource) };
        Ok(layout.row_pitch)
    }

    fn destroy_image(&mut self, image: vk::Image) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_image(image, None) };
        }
    }

    fn create_image_view(&mut self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            })
            .subresource_range(COLOR_RANGE);

        unsafe { self.device()?.create_image_view(&create_info, None) }
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_image_view(view, None) };
        }
    }

    fn create_sampler(&mut self) -> VkResult<vk::Sampler> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .compare_op(vk::CompareOp::NEVER)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
            .unnormalized_coordinates(false);

        unsafe { self.device()?.create_sampler(&create_info, None) }
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_sampler(sampler, None) };
        }
    }

    fn create_descriptor_set_layout(&mut self, bindings: &[vk::DescriptorSetLayoutBinding]) -> VkResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        unsafe { self.device()?.create_descriptor_set_layout(&create_info, None) }
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_descriptor_set_layout(layout, None) };
        }
    }

    fn create_descriptor_pool(&mut self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool> {
        // Sets are freed one by one during teardown
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(sizes);
        unsafe { self.device()?.create_descriptor_pool(&create_info, None) }
    }

    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_descriptor_pool(pool, None) };
        }
    }

    fn allocate_descriptor_set(&mut self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> VkResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device()?.allocate_descriptor_sets(&alloc_info) }?;
        sets.into_iter().next().ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
    }

    fn write_descriptor_set(
        &mut self,
        set: vk::DescriptorSet,
        uniform: vk::DescriptorBufferInfo,
        images: &[vk::DescriptorImageInfo],
    ) {
        let Ok(device) = self.device() else {
            return;
        };

        let buffer_infos = [uniform];
        let mut writes = vec![vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_infos)
            .build()];

        if !images.is_empty() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(images)
                    .build(),
            );
        }

        unsafe { device.update_descriptor_sets(&writes, &[]) };
    }

    fn free_descriptor_sets(&mut self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]) {
        if let Ok(device) = self.device() {
            if let Err(e) = unsafe { device.free_descriptor_sets(pool, sets) } {
                log::warn!("vkFreeDescriptorSets failed with {}", e);
            }
        }
    }

    fn create_render_pass(&mut self, format: vk::Format) -> VkResult<vk::RenderPass> {
        // Color attachment (the swapchain image)
        let color_attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_attachment_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let color_attachments = &[color_attachment_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(color_attachments)
            .build();

        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let attachments = &[color_attachment];
        let subpasses = &[subpass];
        let dependencies = &[dependency];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        unsafe { self.device()?.create_render_pass(&render_pass_info, None) }
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_render_pass(render_pass, None) };
        }
    }

    fn create_framebuffer(&mut self, render_pass: vk::RenderPass, view: vk::ImageView, extent: vk::Extent2D) -> VkResult<vk::Framebuffer> {
        let attachments = [view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        unsafe { self.device()?.create_framebuffer(&framebuffer_info, None) }
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn create_shader_module(&mut self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { self.device()?.create_shader_module(&create_info, None) }
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_shader_module(module, None) };
        }
    }

    fn create_pipeline_layout(&mut self, set_layout: vk::DescriptorSetLayout) -> VkResult<vk::PipelineLayout> {
        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        unsafe { self.device()?.create_pipeline_layout(&layout_info, None) }
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_pipeline_layout(layout, None) };
        }
    }

    fn create_pipeline_cache(&mut self) -> VkResult<vk::PipelineCache> {
        let cache_info = vk::PipelineCacheCreateInfo::builder();
        unsafe { self.device()?.create_pipeline_cache(&cache_info, None) }
    }

    fn destroy_pipeline_cache(&mut self, cache: vk::PipelineCache) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_pipeline_cache(cache, None) };
        }
    }

    fn create_graphics_pipeline(&mut self, cache: vk::PipelineCache, desc: &PipelineDesc) -> VkResult<vk::Pipeline> {
        let entry_point = c"main";

        let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(desc.vertex_shader)
            .name(entry_point)
            .build();

        let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(desc.fragment_shader)
            .name(entry_point)
            .build();

        let shader_stages = &[vert_stage, frag_stage];

        let bindings = [desc.vertex_binding];
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes);

        let fixed = &desc.fixed;

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(fixed.topology)
            .primitive_restart_enable(false);

        // Viewport and scissor are baked in; there is no dynamic state
        let viewports = &[fixed.viewport];
        let scissors = &[fixed.scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(viewports)
            .scissors(scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(fixed.polygon_mode)
            .line_width(1.0)
            .cull_mode(fixed.cull_mode)
            .front_face(fixed.front_face)
            .depth_bias_enable(false);

        let sample_mask = [u32::MAX];
        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(fixed.samples)
            .sample_mask(&sample_mask);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(fixed.blend_enable)
            .build();

        let color_blend_attachments = &[color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            self.device()?
                .create_graphics_pipelines(cache, &[pipeline_info], None)
                .map_err(|(_, e)| e)
        }?;

        pipelines.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_pipeline(pipeline, None) };
        }
    }

    fn create_command_pool(&mut self, queue_family: u32) -> VkResult<vk::CommandPool> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        unsafe { self.device()?.create_command_pool(&pool_info, None) }
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_command_pool(pool, None) };
        }
    }

    fn allocate_command_buffers(&mut self, pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device()?.allocate_command_buffers(&alloc_info) }
    }

    fn free_command_buffers(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        if let Ok(device) = self.device() {
            unsafe { device.free_command_buffers(pool, buffers) };
        }
    }

    fn record_draw(&mut self, cmd: vk::CommandBuffer, draw: &DrawRecording) -> VkResult<()> {
        let device = self.device()?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: draw.clear_color,
            },
        }];

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(draw.render_pass)
            .framebuffer(draw.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: draw.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::builder();
            device.begin_command_buffer(cmd, &begin_info)?;

            device.cmd_begin_render_pass(cmd, &render_pass_begin, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                draw.pipeline_layout,
                0,
                &[draw.descriptor_set],
                &[],
            );
            device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, draw.index_buffer, 0, vk::IndexType::UINT16);
            device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd)
        }
    }

    fn record_layout_transition(&mut self, cmd: vk::CommandBuffer, transition: &LayoutTransition) -> VkResult<()> {
        let device = self.device()?;

        let barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access)
            .old_layout(transition.old_layout)
            .new_layout(transition.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(transition.image)
            .subresource_range(COLOR_RANGE)
            .build();

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;

            device.cmd_pipeline_barrier(
                cmd,
                transition.src_stage,
                transition.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );

            device.end_command_buffer(cmd)
        }
    }

    fn create_fence(&mut self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device()?.create_fence(&fence_info, None) }
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_fence(fence, None) };
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device()?.reset_fences(&[fence]) }
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device()?.wait_for_fences(&[fence], true, timeout_ns) }
    }

    fn create_semaphore(&mut self) -> VkResult<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device()?.create_semaphore(&semaphore_info, None) }
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }

    fn queue_submit(&mut self, queue: vk::Queue, submission: &Submission, fence: vk::Fence) -> VkResult<()> {
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = submission.wait.into_iter().unzip();
        let signal_semaphores: Vec<vk::Semaphore> = submission.signal.into_iter().collect();
        let command_buffers = [submission.command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe { self.device()?.queue_submit(queue, &[submit_info.build()], fence) }
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

// Native graphics API capability interface
//
// Everything above this trait (bootstrap, swapchain manager, uploads,
// pipeline builder, draw protocol, teardown) is written against `Gpu`.
// `VulkanGpu` implements it with ash; tests implement it with a recording
// double. Handles are plain `vk` handles, so the two are interchangeable.

use ash::prelude::VkResult;
use ash::vk;
use std::ffi::CStr;

/// Fixed-function state baked into the single graphics pipeline
#[derive(Debug, Clone, Copy)]
pub struct FixedFunction {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub samples: vk::SampleCountFlags,
    pub blend_enable: bool,
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
}

#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    pub vertex_binding: vk::VertexInputBindingDescription,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub fixed: FixedFunction,
}

#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
}

/// The commands pre-recorded into each per-image command buffer
#[derive(Debug, Clone, Copy)]
pub struct DrawRecording {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct LayoutTransition {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
}

pub trait Gpu {
    // -------------------------------------------------------------------------
    // Instance level
    // -------------------------------------------------------------------------
    fn instance_extensions(&self) -> VkResult<Vec<String>>;
    fn instance_layers(&self) -> VkResult<Vec<String>>;
    fn create_instance(
        &mut self,
        app_name: &CStr,
        extensions: &[&CStr],
        layers: &[&CStr],
    ) -> VkResult<vk::Instance>;
    fn destroy_instance(&mut self, instance: vk::Instance);

    fn create_debug_messenger(&mut self, instance: vk::Instance) -> VkResult<vk::DebugUtilsMessengerEXT>;
    fn destroy_debug_messenger(&mut self, messenger: vk::DebugUtilsMessengerEXT);

    fn destroy_surface(&mut self, surface: vk::SurfaceKHR);

    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>>;
    fn physical_device_properties(&self, gpu: vk::PhysicalDevice) -> VkResult<vk::PhysicalDeviceProperties>;
    fn queue_family_properties(&self, gpu: vk::PhysicalDevice) -> VkResult<Vec<vk::QueueFamilyProperties>>;
    fn memory_properties(&self, gpu: vk::PhysicalDevice) -> VkResult<vk::PhysicalDeviceMemoryProperties>;
    fn device_extensions(&self, gpu: vk::PhysicalDevice) -> VkResult<Vec<String>>;
    fn surface_support(&self, gpu: vk::PhysicalDevice, queue_family: u32, surface: vk::SurfaceKHR) -> VkResult<bool>;

    // -------------------------------------------------------------------------
    // Device level
    // -------------------------------------------------------------------------
    fn create_device(
        &mut self,
        gpu: vk::PhysicalDevice,
        queue_family: u32,
        extensions: &[&CStr],
    ) -> VkResult<vk::Device>;
    fn destroy_device(&mut self, device: vk::Device);
    fn device_queue(&self, queue_family: u32, index: u32) -> VkResult<vk::Queue>;
    fn device_wait_idle(&self) -> VkResult<()>;

    // -------------------------------------------------------------------------
    // Surface + swapchain
    // -------------------------------------------------------------------------
    fn surface_capabilities(&self, gpu: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self, gpu: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(&self, gpu: vk::PhysicalDevice, surface: vk::SurfaceKHR) -> VkResult<Vec<vk::PresentModeKHR>>;

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR);
    fn acquire_next_image(&mut self, swapchain: vk::SwapchainKHR, timeout: u64, signal: vk::Semaphore) -> VkResult<u32>;
    fn queue_present(
        &mut self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: Option<vk::Semaphore>,
    ) -> VkResult<()>;

    // -------------------------------------------------------------------------
    // Buffers + memory
    // -------------------------------------------------------------------------
    fn create_buffer(&mut self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VkResult<vk::Buffer>;
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> VkResult<vk::MemoryRequirements>;
    fn bind_buffer_memory(&mut self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VkResult<()>;
    fn destroy_buffer(&mut self, buffer: vk::Buffer);

    fn allocate_memory(&mut self, size: vk::DeviceSize, memory_type_index: u32) -> VkResult<vk::DeviceMemory>;
    /// Maps `size` bytes at `offset`; the pointer stays valid until `unmap_memory`
    fn map_memory(&mut self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> VkResult<*mut u8>;
    fn unmap_memory(&mut self, memory: vk::DeviceMemory);
    fn free_memory(&mut self, memory: vk::DeviceMemory);

    // -------------------------------------------------------------------------
    // Images
    // -------------------------------------------------------------------------
    /// Linear-tiled, sampled, single-mip 2D image in the PREINITIALIZED layout
    fn create_texture_image(&mut self, extent: vk::Extent2D, format: vk::Format) -> VkResult<vk::Image>;
    fn image_memory_requirements(&self, image: vk::Image) -> VkResult<vk::MemoryRequirements>;
    fn bind_image_memory(&mut self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()>;
    /// Row pitch of the color aspect, mip 0, layer 0
    fn image_row_pitch(&self, image: vk::Image) -> VkResult<vk::DeviceSize>;
    fn destroy_image(&mut self, image: vk::Image);

    fn create_image_view(&mut self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&mut self, view: vk::ImageView);
    fn create_sampler(&mut self) -> VkResult<vk::Sampler>;
    fn destroy_sampler(&mut self, sampler: vk::Sampler);

    // -------------------------------------------------------------------------
    // Descriptors
    // -------------------------------------------------------------------------
    fn create_descriptor_set_layout(&mut self, bindings: &[vk::DescriptorSetLayoutBinding]) -> VkResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(&mut self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VkResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool);
    fn allocate_descriptor_set(&mut self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> VkResult<vk::DescriptorSet>;
    fn write_descriptor_set(
        &mut self,
        set: vk::DescriptorSet,
        uniform: vk::DescriptorBufferInfo,
        images: &[vk::DescriptorImageInfo],
    );
    fn free_descriptor_sets(&mut self, pool: vk::DescriptorPool, sets: &[vk::DescriptorSet]);

    // -------------------------------------------------------------------------
    // Render pass, framebuffers, pipeline
    // -------------------------------------------------------------------------
    fn create_render_pass(&mut self, format: vk::Format) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass);
    fn create_framebuffer(&mut self, render_pass: vk::RenderPass, view: vk::ImageView, extent: vk::Extent2D) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);

    fn create_shader_module(&mut self, code: &[u32]) -> VkResult<vk::ShaderModule>;
    fn destroy_shader_module(&mut self, module: vk::ShaderModule);
    fn create_pipeline_layout(&mut self, set_layout: vk::DescriptorSetLayout) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout);
    fn create_pipeline_cache(&mut self) -> VkResult<vk::PipelineCache>;
    fn destroy_pipeline_cache(&mut self, cache: vk::PipelineCache);
    fn create_graphics_pipeline(&mut self, cache: vk::PipelineCache, desc: &PipelineDesc) -> VkResult<vk::Pipeline>;
    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline);

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------
    fn create_command_pool(&mut self, queue_family: u32) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&mut self, pool: vk::CommandPool);
    fn allocate_command_buffers(&mut self, pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&mut self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    /// Begin, render pass with one indexed draw, end
    fn record_draw(&mut self, cmd: vk::CommandBuffer, draw: &DrawRecording) -> VkResult<()>;
    /// Begin (one-time submit), one image barrier, end
    fn record_layout_transition(&mut self, cmd: vk::CommandBuffer, transition: &LayoutTransition) -> VkResult<()>;

    // -------------------------------------------------------------------------
    // Synchronization + submission
    // -------------------------------------------------------------------------
    fn create_fence(&mut self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&mut self, fence: vk::Fence);
    fn reset_fence(&mut self, fence: vk::Fence) -> VkResult<()>;
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn create_semaphore(&mut self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);
    fn queue_submit(&mut self, queue: vk::Queue, submission: &Submission, fence: vk::Fence) -> VkResult<()>;
}

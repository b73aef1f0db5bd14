// Swapchain - Window presentation
//
// Owns the chain of presentable images and everything kept per image:
// image views, framebuffers, uniform buffers and descriptor sets, plus the
// descriptor pool and set layout they come from. Built in stages so the
// render pass can be created in between; every stage records handles as
// soon as they exist, so `destroy` releases a partial swapchain too.

use ash::vk;

use super::buffer::{DeviceBuffer, Texture};
use super::device::DeviceContext;
use super::gpu::{Gpu, SwapchainDesc};
use crate::error::{GpuError, GpuResult};

/// Presentation formats we accept, best first
pub const PREFERRED_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

/// First preferred format the surface reports
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> GpuResult<vk::SurfaceFormatKHR> {
    PREFERRED_FORMATS
        .iter()
        .find_map(|&wanted| formats.iter().find(|f| f.format == wanted).copied())
        .ok_or(GpuError::NoSuitableSurfaceFormat {
            reported: formats.len(),
        })
}

/// The surface's current extent, or the window size clamped to the surface
/// limits when the surface leaves it to us
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// FIFO is always supported
pub fn choose_present_mode(available: &[vk::PresentModeKHR], requested: vk::PresentModeKHR) -> vk::PresentModeKHR {
    if available.contains(&requested) {
        requested
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// One uniform slot per image, plus one sampler slot per image per texture
pub fn descriptor_pool_sizes(image_count: u32, texture_count: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes = vec![vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: image_count,
    }];
    if texture_count > 0 {
        sizes.push(vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: image_count * texture_count,
        });
    }
    sizes
}

/// Binding 0: uniform buffer (vertex). Binding 1: texture array (fragment).
pub fn set_layout_bindings(texture_count: u32) -> Vec<vk::DescriptorSetLayoutBinding> {
    let mut bindings = vec![vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .build()];
    if texture_count > 0 {
        bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(texture_count)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .build(),
        );
    }
    bindings
}

#[derive(Debug, Default)]
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub uniform_buffers: Vec<DeviceBuffer>,
    pub uniform_size: vk::DeviceSize,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub descriptor_pool: vk::DescriptorPool,
    pub descriptor_sets: Vec<vk::DescriptorSet>,
}

impl Swapchain {
    /// Set layout, format, swapchain, images and one uniform buffer per
    /// image (initialised with `uniform_data`)
    pub fn new<G: Gpu>(
        gpu: &mut G,
        context: &DeviceContext,
        window: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
        uniform_data: &[u8],
        texture_count: u32,
    ) -> GpuResult<Self> {
        let mut swapchain = Self::default();
        match swapchain.create(gpu, context, window, present_mode, uniform_data, texture_count) {
            Ok(()) => Ok(swapchain),
            Err(e) => {
                swapchain.destroy(gpu);
                Err(e)
            }
        }
    }

    fn create<G: Gpu>(
        &mut self,
        gpu: &mut G,
        context: &DeviceContext,
        window: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
        uniform_data: &[u8],
        texture_count: u32,
    ) -> GpuResult<()> {
        self.descriptor_set_layout = gpu
            .create_descriptor_set_layout(&set_layout_bindings(texture_count))
            .map_err(GpuError::call("vkCreateDescriptorSetLayout"))?;

        let capabilities = gpu
            .surface_capabilities(context.physical_device, context.surface)
            .map_err(GpuError::call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
        let formats = gpu
            .surface_formats(context.physical_device, context.surface)
            .map_err(GpuError::call("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
        log::info!("Got {} physical device surface formats", formats.len());

        self.format = choose_surface_format(&formats)?;

        let present_modes = gpu
            .surface_present_modes(context.physical_device, context.surface)
            .map_err(GpuError::call("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;
        self.present_mode = choose_present_mode(&present_modes, present_mode);
        if self.present_mode != present_mode {
            log::warn!("Present mode {:?} unsupported, using FIFO", present_mode);
        }

        self.extent = choose_extent(&capabilities, window);
        log::info!(
            "Creating swapchain: {}x{} {:?} {:?}",
            self.extent.width,
            self.extent.height,
            self.format.format,
            self.present_mode
        );

        self.swapchain = gpu
            .create_swapchain(&SwapchainDesc {
                surface: context.surface,
                min_image_count: capabilities.min_image_count,
                format: self.format,
                extent: self.extent,
                pre_transform: capabilities.current_transform,
                present_mode: self.present_mode,
            })
            .map_err(GpuError::call("vkCreateSwapchainKHR"))?;

        self.images = gpu
            .swapchain_images(self.swapchain)
            .map_err(GpuError::call("vkGetSwapchainImagesKHR"))?;
        log::info!("Swapchain length: {}", self.images.len());

        self.uniform_size = uniform_data.len() as vk::DeviceSize;
        for _ in 0..self.images.len() {
            let buffer = DeviceBuffer::with_data(
                gpu,
                &context.memory_properties,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                uniform_data,
            )?;
            self.uniform_buffers.push(buffer);
        }

        Ok(())
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn create_descriptor_pool<G: Gpu>(&mut self, gpu: &mut G, texture_count: u32) -> GpuResult<()> {
        let sizes = descriptor_pool_sizes(self.image_count(), texture_count);
        self.descriptor_pool = gpu
            .create_descriptor_pool(self.image_count(), &sizes)
            .map_err(GpuError::call("vkCreateDescriptorPool"))?;
        Ok(())
    }

    /// One set per image: its uniform buffer at binding 0, the textures at 1
    pub fn create_descriptor_sets<G: Gpu>(&mut self, gpu: &mut G, textures: &[Texture]) -> GpuResult<()> {
        let image_infos: Vec<vk::DescriptorImageInfo> = textures.iter().map(Texture::descriptor).collect();

        for i in 0..self.images.len() {
            let set = gpu
                .allocate_descriptor_set(self.descriptor_pool, self.descriptor_set_layout)
                .map_err(GpuError::call("vkAllocateDescriptorSets"))?;
            self.descriptor_sets.push(set);

            let uniform = vk::DescriptorBufferInfo {
                buffer: self.uniform_buffers[i].buffer,
                offset: 0,
                range: self.uniform_size,
            };
            gpu.write_descriptor_set(set, uniform, &image_infos);
        }

        Ok(())
    }

    /// One image view and one framebuffer per presentable image
    pub fn create_framebuffers<G: Gpu>(&mut self, gpu: &mut G, render_pass: vk::RenderPass) -> GpuResult<()> {
        for &image in &self.images {
            let view = gpu
                .create_image_view(image, self.format.format)
                .map_err(GpuError::call("vkCreateImageView"))?;
            self.image_views.push(view);
        }

        for &view in &self.image_views {
            let framebuffer = gpu
                .create_framebuffer(render_pass, view, self.extent)
                .map_err(GpuError::call("vkCreateFramebuffer"))?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    /// Framebuffers, image views, uniform buffers + memory, descriptor sets,
    /// descriptor pool, set layout, swapchain
    pub fn destroy<G: Gpu>(&mut self, gpu: &mut G) {
        for framebuffer in self.framebuffers.drain(..) {
            gpu.destroy_framebuffer(framebuffer);
        }
        for view in self.image_views.drain(..) {
            gpu.destroy_image_view(view);
        }
        for buffer in self.uniform_buffers.drain(..) {
            buffer.destroy(gpu);
        }
        if !self.descriptor_sets.is_empty() {
            gpu.free_descriptor_sets(self.descriptor_pool, &self.descriptor_sets);
            self.descriptor_sets.clear();
        }
        if self.descriptor_pool != vk::DescriptorPool::null() {
            gpu.destroy_descriptor_pool(self.descriptor_pool);
            self.descriptor_pool = vk::DescriptorPool::null();
        }
        if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
            gpu.destroy_descriptor_set_layout(self.descriptor_set_layout);
            self.descriptor_set_layout = vk::DescriptorSetLayout::null();
        }
        if self.swapchain != vk::SwapchainKHR::null() {
            gpu.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
        }
        self.images.clear();
    }
}

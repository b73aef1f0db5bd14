// Buffer utilities for vertex, index, uniform buffers and textures
//
// One allocate-and-upload procedure backs every host-visible resource:
// create the object, query its memory requirements and pick a host-visible
// type, allocate + map + copy, then bind. Aggregates start out with null
// handles and `destroy` skips whatever was never created, so a failure at
// any step can release the partial object the same way as a finished one.

use ash::vk;

use super::gpu::{Gpu, LayoutTransition, Submission};
use super::sync::FENCE_TIMEOUT_NS;
use crate::error::{GpuError, GpuResult};

pub const HOST_VISIBLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Find the first memory type allowed by `type_bits` that has all `flags`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> GpuResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(flags)
        })
        .ok_or(GpuError::NoMemoryType { type_bits, flags })
}

/// Map, copy as much of `data` as fits in `allocation_size`, unmap.
/// Returns the number of bytes copied.
pub fn write_mapped<G: Gpu>(
    gpu: &mut G,
    memory: vk::DeviceMemory,
    allocation_size: vk::DeviceSize,
    data: &[u8],
) -> GpuResult<usize> {
    let len = data.len().min(allocation_size as usize);
    if len == 0 {
        return Ok(0);
    }

    let ptr = gpu
        .map_memory(memory, 0, len as vk::DeviceSize)
        .map_err(GpuError::call("vkMapMemory"))?;
    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, len);
    }
    gpu.unmap_memory(memory);

    Ok(len)
}

/// `write_mapped` that refuses to leave device memory partially written
pub fn upload<G: Gpu>(
    gpu: &mut G,
    memory: vk::DeviceMemory,
    allocation_size: vk::DeviceSize,
    data: &[u8],
) -> GpuResult<()> {
    let copied = write_mapped(gpu, memory, allocation_size, data)?;
    if copied != data.len() {
        log::warn!("Copied {} of {} bytes into device memory", copied, data.len());
        return Err(GpuError::ShortCopy {
            copied,
            expected: data.len(),
        });
    }
    Ok(())
}

/// A host-visible buffer bound 1:1 to its own allocation
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    /// Allocation size (may exceed the requested size)
    pub allocation_size: vk::DeviceSize,
}

impl DeviceBuffer {
    /// Create a buffer and fill it with data
    pub fn with_data<G: Gpu>(
        gpu: &mut G,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> GpuResult<Self> {
        let mut buffer = Self::default();
        match buffer.fill(gpu, memory_properties, usage, data) {
            Ok(()) => Ok(buffer),
            Err(e) => {
                buffer.destroy(gpu);
                Err(e)
            }
        }
    }

    fn fill<G: Gpu>(
        &mut self,
        gpu: &mut G,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> GpuResult<()> {
        self.buffer = gpu
            .create_buffer(data.len() as vk::DeviceSize, usage)
            .map_err(GpuError::call("vkCreateBuffer"))?;

        let requirements = gpu
            .buffer_memory_requirements(self.buffer)
            .map_err(GpuError::call("vkGetBufferMemoryRequirements"))?;
        let memory_type = find_memory_type(memory_properties, requirements.memory_type_bits, HOST_VISIBLE)?;

        self.memory = gpu
            .allocate_memory(requirements.size, memory_type)
            .map_err(GpuError::call("vkAllocateMemory"))?;
        self.allocation_size = requirements.size;

        upload(gpu, self.memory, self.allocation_size, data)?;

        gpu.bind_buffer_memory(self.buffer, self.memory)
            .map_err(GpuError::call("vkBindBufferMemory"))
    }

    /// Overwrite the start of the buffer (per-frame uniform updates)
    pub fn write<G: Gpu>(&self, gpu: &mut G, data: &[u8]) -> GpuResult<()> {
        upload(gpu, self.memory, self.allocation_size, data)
    }

    pub fn destroy<G: Gpu>(&self, gpu: &mut G) {
        if self.buffer != vk::Buffer::null() {
            gpu.destroy_buffer(self.buffer);
        }
        if self.memory != vk::DeviceMemory::null() {
            gpu.free_memory(self.memory);
        }
    }
}

/// Lay out tightly packed RGBA8 rows at the device's row pitch.
/// A pitch narrower than a row cannot hold the data, so the tight layout
/// is kept in that case.
pub fn pack_rows(rgba: &[u8], width: u32, height: u32, row_pitch: usize) -> Vec<u8> {
    let row_bytes = width as usize * 4;
    if row_pitch <= row_bytes {
        return rgba.to_vec();
    }

    let mut packed = vec![0u8; row_pitch * height as usize];
    for (dst, src) in packed.chunks_exact_mut(row_pitch).zip(rgba.chunks_exact(row_bytes)) {
        dst[..row_bytes].copy_from_slice(src);
    }
    packed
}

/// Decoded RGBA8 pixels ready for upload
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Sampled 2D texture: linear-tiled image + memory + view + sampler
#[derive(Debug, Clone, Copy, Default)]
pub struct Texture {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub extent: vk::Extent2D,
}

impl Texture {
    pub const FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

    pub fn new<G: Gpu>(
        gpu: &mut G,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        queue: vk::Queue,
        queue_family: u32,
        data: &TextureData,
    ) -> GpuResult<Self> {
        log::info!("Creating texture: {}x{}", data.width, data.height);

        let mut texture = Self {
            extent: vk::Extent2D {
                width: data.width,
                height: data.height,
            },
            ..Default::default()
        };
        match texture.fill(gpu, memory_properties, queue, queue_family, data) {
            Ok(()) => Ok(texture),
            Err(e) => {
                texture.destroy(gpu);
                Err(e)
            }
        }
    }

    fn fill<G: Gpu>(
        &mut self,
        gpu: &mut G,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        queue: vk::Queue,
        queue_family: u32,
        data: &TextureData,
    ) -> GpuResult<()> {
        self.image = gpu
            .create_texture_image(self.extent, Self::FORMAT)
            .map_err(GpuError::call("vkCreateImage"))?;

        let requirements = gpu
            .image_memory_requirements(self.image)
            .map_err(GpuError::call("vkGetImageMemoryRequirements"))?;
        let memory_type = find_memory_type(memory_properties, requirements.memory_type_bits, HOST_VISIBLE)?;

        self.memory = gpu
            .allocate_memory(requirements.size, memory_type)
            .map_err(GpuError::call("vkAllocateMemory"))?;

        let row_pitch = gpu
            .image_row_pitch(self.image)
            .map_err(GpuError::call("vkGetImageSubresourceLayout"))?;
        let pixels = pack_rows(&data.rgba, data.width, data.height, row_pitch as usize);
        upload(gpu, self.memory, requirements.size, &pixels)?;

        gpu.bind_image_memory(self.image, self.memory)
            .map_err(GpuError::call("vkBindImageMemory"))?;

        transition_to_shader_read(gpu, queue, queue_family, self.image)?;

        self.view = gpu
            .create_image_view(self.image, Self::FORMAT)
            .map_err(GpuError::call("vkCreateImageView"))?;
        self.sampler = gpu
            .create_sampler()
            .map_err(GpuError::call("vkCreateSampler"))?;

        Ok(())
    }

    pub fn descriptor(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// View, memory, image, sampler
    pub fn destroy<G: Gpu>(&self, gpu: &mut G) {
        if self.view != vk::ImageView::null() {
            gpu.destroy_image_view(self.view);
        }
        if self.memory != vk::DeviceMemory::null() {
            gpu.free_memory(self.memory);
        }
        if self.image != vk::Image::null() {
            gpu.destroy_image(self.image);
        }
        if self.sampler != vk::Sampler::null() {
            gpu.destroy_sampler(self.sampler);
        }
    }
}

/// PREINITIALIZED -> SHADER_READ_ONLY_OPTIMAL on a one-shot command buffer
fn transition_to_shader_read<G: Gpu>(
    gpu: &mut G,
    queue: vk::Queue,
    queue_family: u32,
    image: vk::Image,
) -> GpuResult<()> {
    let pool = gpu
        .create_command_pool(queue_family)
        .map_err(GpuError::call("vkCreateCommandPool"))?;

    let mut command_buffer = vk::CommandBuffer::null();
    let mut fence = vk::Fence::null();

    let mut submit = || -> GpuResult<()> {
        command_buffer = gpu
            .allocate_command_buffers(pool, 1)
            .map_err(GpuError::call("vkAllocateCommandBuffers"))?
            .first()
            .copied()
            .unwrap_or_default();

        gpu.record_layout_transition(
            command_buffer,
            &LayoutTransition {
                image,
                old_layout: vk::ImageLayout::PREINITIALIZED,
                new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                src_access: vk::AccessFlags::HOST_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::INPUT_ATTACHMENT_READ,
                src_stage: vk::PipelineStageFlags::HOST,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            },
        )
        .map_err(GpuError::call("vkBeginCommandBuffer"))?;

        fence = gpu
            .create_fence(false)
            .map_err(GpuError::call("vkCreateFence"))?;

        let submission = Submission {
            command_buffer,
            wait: None,
            signal: None,
        };
        gpu.queue_submit(queue, &submission, fence)
            .map_err(GpuError::call("vkQueueSubmit"))?;
        gpu.wait_for_fence(fence, FENCE_TIMEOUT_NS)
            .map_err(GpuError::call("vkWaitForFences"))
    };
    let result = submit();

    if fence != vk::Fence::null() {
        gpu.destroy_fence(fence);
    }
    if command_buffer != vk::CommandBuffer::null() {
        gpu.free_command_buffers(pool, &[command_buffer]);
    }
    gpu.destroy_command_pool(pool);

    result
}

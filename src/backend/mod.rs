// Backend module - Vulkan abstraction layer
//
// Design: everything GPU-facing is written against the `Gpu` trait; ash
// lives only in `vulkan`. Each aggregate (device context, swapchain,
// buffers, pipeline, sync) owns its handles exclusively and knows how to
// release them, including after a partial build.

pub mod buffer;
pub mod device;
pub mod gpu;
#[cfg(test)]
pub mod mock;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use device::{DeviceContext, DeviceOptions};
pub use gpu::Gpu;
pub use vulkan::VulkanGpu;

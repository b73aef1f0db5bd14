// Typed errors for the GPU-facing core
//
// Setup-phase failures surface as `GpuError` and are fatal to the caller.
// Frame-phase failures never use these types: they come back as a
// `FrameOutcome` instead (see renderer.rs).

use ash::vk;
use thiserror::Error;

pub type GpuResult<T> = Result<T, GpuError>;

/// Which native call failed while bringing up the device context
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("vkCreateInstance failed with {0}")]
    InstanceCreation(vk::Result),
    #[error("surface creation failed with {0}")]
    SurfaceCreation(vk::Result),
    #[error("vkEnumeratePhysicalDevices failed with {0}")]
    AdapterEnumeration(vk::Result),
    #[error("no GPUs found on the system")]
    NoAdapter,
    #[error("no adapter exposes a queue family with graphics and present support")]
    NoSuitableQueue,
    #[error("vkCreateDevice failed with {0}")]
    DeviceCreation(vk::Result),
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset {0} not found")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("{call} failed with {result}")]
    Call {
        call: &'static str,
        result: vk::Result,
    },

    #[error("no suitable surface format among {reported} reported")]
    NoSuitableSurfaceFormat { reported: usize },

    #[error("no memory type in bits {type_bits:#x} has {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("copied {copied} of {expected} bytes into device memory")]
    ShortCopy { copied: usize, expected: usize },

    #[error("shader {name} is not valid SPIR-V ({len} bytes)")]
    InvalidShader { name: String, len: usize },

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error("texture decode failed: {0}")]
    Texture(#[from] image::ImageError),
}

impl GpuError {
    /// Adapter for `map_err` that names the native call which failed
    pub fn call(call: &'static str) -> impl FnOnce(vk::Result) -> GpuError {
        move |result| GpuError::Call { call, result }
    }
}

// Shader module loading
//
// Shaders are compiled to SPIR-V at build time and embedded by name.
// SPIR-V is a stream of 4-byte words, so the bytes are re-read as u32s
// (the embedded bytes carry no alignment guarantee).

use ash::vk;

use super::gpu::Gpu;
use crate::assets::Assets;
use crate::error::{GpuError, GpuResult};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Reinterpret SPIR-V bytes as native-endian words
pub fn spirv_words(name: &str, bytes: &[u8]) -> GpuResult<Vec<u32>> {
    let invalid = || GpuError::InvalidShader {
        name: name.to_string(),
        len: bytes.len(),
    };

    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(invalid());
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        return Err(invalid());
    }
    Ok(words)
}

/// Look up an embedded shader and create a module from it
pub fn load_shader_module<G: Gpu>(gpu: &mut G, assets: &Assets, name: &str) -> GpuResult<vk::ShaderModule> {
    let words = spirv_words(name, assets.get(name)?)?;
    gpu.create_shader_module(&words)
        .map_err(GpuError::call("vkCreateShaderModule"))
}

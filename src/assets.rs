// Embedded asset table
//
// build.rs compiles the shaders and lists every file under assets/; the
// resulting table is compiled into the binary and looked up by name.

use crate::backend::buffer::TextureData;
use crate::error::AssetError;

include!(concat!(env!("OUT_DIR"), "/assets.rs"));

#[derive(Debug, Clone, Copy)]
pub struct Assets {
    entries: &'static [(&'static str, &'static [u8])],
}

impl Assets {
    /// The table generated at build time
    pub fn embedded() -> Self {
        Self { entries: EMBEDDED }
    }

    pub fn from_entries(entries: &'static [(&'static str, &'static [u8])]) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Result<&'static [u8], AssetError> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|(_, bytes)| *bytes)
            .ok_or_else(|| AssetError::NotFound(name.to_string()))
    }
}

/// Decode a JPEG into tightly packed RGBA8 rows
pub fn decode_texture(bytes: &[u8]) -> Result<TextureData, image::ImageError> {
    let rgba = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)?.to_rgba8();
    Ok(TextureData {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
    })
}

//! Texture decoding into RGBA8.

use std::path::Path;

use tracing::debug;

use crate::error::{ResourceError, ResourceResult};

/// Decoded pixels, four bytes per texel, rows tightly packed.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Decodes any supported image file and expands it to RGBA8.
    pub fn load_rgba8(path: &Path) -> ResourceResult<Self> {
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        let rgba = image::open(path)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        debug!("Decoded {} ({}x{})", path.display(), width, height);

        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    /// Byte size of the pixel data as uploaded.
    #[inline]
    pub fn byte_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * 4
    }
}

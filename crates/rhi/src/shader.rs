//! Precompiled SPIR-V shaders.
//!
//! Shaders ship as `<dir>/<name>.spv` blobs produced offline; nothing is
//! compiled at runtime. A [`Shader`] only has to live until the pipeline that
//! uses it is built.

use std::ffi::CStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Every shader in this renderer enters at `main`.
pub const ENTRY_POINT: &CStr = c"main";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        })
    }
}

/// Location of the blob for shader `name`.
pub fn spirv_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.spv", name))
}

/// Splits a blob into code words, rejecting truncated files and files
/// without the SPIR-V magic number.
pub fn decode_spirv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| RhiError::ShaderError(format!("Invalid SPIR-V: {}", e)))
}

/// Shader module of one stage.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl Shader {
    /// Reads [`spirv_path`]`(dir, name)` and creates the module.
    ///
    /// # Errors
    ///
    /// [`RhiError::ShaderError`] if the blob is missing or not SPIR-V.
    pub fn load(device: Arc<Device>, dir: &Path, name: &str, stage: ShaderStage) -> RhiResult<Self> {
        let path = spirv_path(dir, name);
        let bytes = std::fs::read(&path).map_err(|e| {
            RhiError::ShaderError(format!("Cannot read {} shader {}: {}", stage, path.display(), e))
        })?;
        let code = decode_spirv(&bytes)?;

        let module = unsafe {
            device
                .handle()
                .create_shader_module(&vk::ShaderModuleCreateInfo::default().code(&code), None)?
        };
        debug!("Loaded {} shader {} ({} words)", stage, path.display(), code.len());

        Ok(Self {
            device,
            module,
            stage,
        })
    }

    /// Pipeline stage entry borrowing this module.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.flags())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_stage_flags() {
        assert_eq!(ShaderStage::Vertex.flags(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(ShaderStage::Fragment.flags(), vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }

    #[test]
    fn test_spirv_path_appends_extension() {
        assert_eq!(
            spirv_path(Path::new("shaders"), "second_frag"),
            Path::new("shaders/second_frag.spv")
        );
        // Dots in the name are kept.
        assert_eq!(
            spirv_path(Path::new("shaders"), "shader.v2"),
            Path::new("shaders/shader.v2.spv")
        );
    }

    #[test]
    fn test_decode_spirv_words() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());

        let words = decode_spirv(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn test_decode_spirv_rejects_misaligned() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.push(0);

        assert!(matches!(decode_spirv(&bytes), Err(RhiError::ShaderError(_))));
    }

    #[test]
    fn test_decode_spirv_rejects_bad_magic() {
        assert!(decode_spirv(&[1, 2, 3, 4]).is_err());
    }
}

//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// A required instance or device extension is not available
    #[error("Missing extension: {0}")]
    MissingExtension(String),

    /// No memory type satisfies both the allowed-type mask and the property flags
    #[error("No memory type in mask {type_bits:#b} has properties {properties:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// None of the candidate formats supports the requested features
    #[error("No supported format among {candidates:?} for {features:?}")]
    UnsupportedFormat {
        candidates: Vec<vk::Format>,
        features: vk::FormatFeatureFlags,
    },

    /// Image layout transition the transfer helpers do not know how to record
    #[error("Unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// Render pass description failed validation
    #[error("Render pass error: {0}")]
    RenderPassError(String),

    /// Shader loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid argument or handle passed to a constructor
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RhiError {
    /// Whether the error describes a missing device or driver capability
    /// rather than a failed object creation.
    pub fn is_capability(&self) -> bool {
        matches!(
            self,
            Self::LoadingError(_)
                | Self::NoSuitableGpu
                | Self::MissingExtension(_)
                | Self::NoSuitableMemoryType { .. }
                | Self::UnsupportedFormat { .. }
        )
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_classification() {
        assert!(RhiError::NoSuitableGpu.is_capability());
        assert!(
            RhiError::NoSuitableMemoryType {
                type_bits: 0b101,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            }
            .is_capability()
        );
        assert!(!RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).is_capability());
        assert!(!RhiError::InvalidArgument("empty".into()).is_capability());
    }

    #[test]
    fn test_memory_type_message_shows_mask() {
        let err = RhiError::NoSuitableMemoryType {
            type_bits: 0b110,
            properties: vk::MemoryPropertyFlags::HOST_VISIBLE,
        };
        assert!(err.to_string().contains("0b110"));
    }
}

//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! A thin RAII layer over `ash` for a render-pass based forward/deferred
//! renderer. It handles:
//! - Instance, physical device and logical device creation
//! - Explicit memory-type selection and blocking transfers
//! - Buffers, images, samplers and descriptor sets
//! - Render pass description and validation, framebuffers, pipelines
//! - Swapchain negotiation and synchronization primitives

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod transfer;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;

//! Two-subpass deferred-composite renderer.
//!
//! This crate drives the frame:
//! - Geometry subpass into per-image color and depth targets
//! - Composite subpass reading them back as input attachments
//! - Double-buffered frame synchronization
//! - GPU-resident meshes, models and textures

pub mod attachments;
pub mod descriptors;
mod error;
pub mod frame;
pub mod mesh;
pub mod model;
pub mod pipelines;
mod renderer;
pub mod texture;
pub mod ubo;

pub use error::{ErrorKind, RenderError, RenderResult};
pub use model::ModelId;
pub use renderer::Renderer;

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

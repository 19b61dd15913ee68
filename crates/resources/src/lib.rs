//! CPU-side asset loading.
//!
//! This crate turns files on disk into plain arrays the renderer uploads:
//! - OBJ scene import into per-mesh vertex attribute and index arrays
//! - Image decoding into tightly packed RGBA8 pixels

mod error;
pub mod scene;
pub mod texture;

pub use error::{ResourceError, ResourceResult};
pub use scene::{ImportedMesh, ImportedScene, import_obj};
pub use texture::TextureData;

//! Error types for asset loading.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for resource loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The OBJ importer rejected the file.
    #[error("Failed to load model '{path}': {source}")]
    ObjLoad {
        /// Path to the file that failed to load.
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    /// The file parsed but contained no drawable geometry.
    #[error("Model '{0}' contains no meshes")]
    NoMeshes(PathBuf),

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

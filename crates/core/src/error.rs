//! Error types shared by the application-facing crates.

use thiserror::Error;

/// Main error type for the window shell and configuration layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors raised outside the RHI crate (surface creation)
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;

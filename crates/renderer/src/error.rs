//! Renderer error taxonomy.

use subpass_resources::ResourceError;
use subpass_rhi::RhiError;
use thiserror::Error;

use crate::frame::SlotTransitionError;

/// Coarse classification of a [`RenderError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The machine cannot run the renderer; raised during `init` only.
    Capability,
    /// A GPU object could not be created.
    ResourceCreation,
    /// Submission or presentation failed; the renderer is unusable.
    Frame,
    /// A model or texture file could not be loaded.
    Asset,
    /// The caller passed something the renderer does not know about.
    Usage,
}

/// Renderer error type.
#[derive(Error, Debug)]
pub enum RenderError {
    /// No suitable GPU, missing extension or layer, or no usable format or
    /// memory type.
    #[error("Unsupported device or driver: {0}")]
    Capability(#[source] RhiError),

    /// A GPU object creation call failed.
    #[error("GPU resource creation failed: {0}")]
    ResourceCreation(#[source] RhiError),

    /// Per-frame acquire, submit or present failed.
    #[error("Frame submission failed: {0}")]
    Frame(#[source] RhiError),

    /// The frame loop drove a slot through an illegal state change.
    #[error(transparent)]
    FrameState(#[from] SlotTransitionError),

    /// Model import or texture decode failed.
    #[error("Asset load failed: {0}")]
    Asset(#[from] ResourceError),

    /// Window or surface creation failed.
    #[error("Platform error: {0}")]
    Platform(#[from] subpass_core::Error),

    /// `update_model` was called with an id `create_model` never returned.
    #[error("Unknown model id {0}")]
    UnknownModel(usize),
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Capability(_) | Self::Platform(_) => ErrorKind::Capability,
            Self::ResourceCreation(_) => ErrorKind::ResourceCreation,
            Self::Frame(_) | Self::FrameState(_) => ErrorKind::Frame,
            Self::Asset(_) => ErrorKind::Asset,
            Self::UnknownModel(_) => ErrorKind::Usage,
        }
    }
}

impl From<RhiError> for RenderError {
    fn from(e: RhiError) -> Self {
        if e.is_capability() {
            Self::Capability(e)
        } else {
            Self::ResourceCreation(e)
        }
    }
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

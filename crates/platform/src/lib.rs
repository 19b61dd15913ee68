//! Window and presentation-surface creation.
//!
//! - A non-resizable winit window sized from [`subpass_core::WindowConfig`]
//! - An owned `VkSurfaceKHR` for that window via `ash-window`
//! - The instance extensions the platform needs for surface creation

mod window;

pub use window::{Surface, Window, get_required_extensions};

// Re-export winit types the application shell needs
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};

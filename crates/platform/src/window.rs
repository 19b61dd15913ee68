//! Window management using winit.

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use subpass_core::{Error, Result, WindowConfig};

/// Owned Vulkan surface.
///
/// The instance the surface was created from must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for surface capability, format and present-mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// A fixed-size window the renderer presents into.
pub struct Window {
    window: Arc<WinitWindow>,
}

impl Window {
    /// Opens a window with the configured size and title.
    ///
    /// The window is not resizable: the swapchain is negotiated once.
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(Error::Window(format!(
                "window size must be non-zero, got {}x{}",
                config.width, config.height
            )));
        }

        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(false);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!(
            "Window '{}' created: {}x{}",
            config.title,
            config.width,
            config.height
        );

        Ok(Self {
            window: Arc::new(window),
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Current framebuffer size in pixels.
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Raw display handle, used to enumerate surface extensions.
    pub fn raw_display_handle(&self) -> Result<RawDisplayHandle> {
        self.window
            .display_handle()
            .map(|handle| handle.as_raw())
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))
    }

    /// Creates a presentation surface for this window.
    ///
    /// # Errors
    ///
    /// [`Error::Window`] if the native handles are unavailable and
    /// [`Error::Vulkan`] if surface creation fails.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self.raw_display_handle()?;
        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle,
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Vulkan(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let loader = ash::khr::surface::Instance::new(entry, instance);
        tracing::info!("Vulkan surface created");

        Ok(Surface { handle, loader })
    }
}

/// Instance extensions required to create a surface on this display.
///
/// The returned pointers reference static strings owned by `ash-window`.
pub fn get_required_extensions(display_handle: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(|e| Error::Vulkan(format!("Failed to enumerate surface extensions: {}", e)))?;

    tracing::debug!(
        "Surface extensions: {:?}",
        extensions
            .iter()
            .map(|&ext| unsafe { CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}

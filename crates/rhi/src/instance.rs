//! Vulkan instance management.
//!
//! Creates the `VkInstance`, optionally enables the Khronos validation layer and
//! routes its messages into `tracing` through a debug-utils messenger.
//!
//! Validation is an explicit argument rather than a build-mode switch, so the
//! caller (usually the configuration layer) decides.
//!
//! # Example
//!
//! ```no_run
//! use subpass_rhi::instance::Instance;
//!
//! // Headless instance (no surface extensions), validation off
//! let instance = Instance::new(c"demo", false, &[]).expect("Failed to create Vulkan instance");
//! assert!(!instance.has_validation());
//! ```

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with optional validation layer support.
///
/// Owns the loader entry, the instance and, when validation is active, the
/// debug messenger. Dropping it destroys the messenger before the instance.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Arguments
    ///
    /// * `app_name` - Application name reported to the driver
    /// * `enable_validation` - Request the validation layer and a debug messenger
    /// * `surface_extensions` - Platform surface extensions (empty for headless use)
    ///
    /// # Errors
    ///
    /// - [`RhiError::LoadingError`] if the Vulkan loader cannot be found
    /// - [`RhiError::MissingExtension`] if a required instance extension is absent
    /// - [`RhiError::VulkanError`] if instance or messenger creation fails
    ///
    /// A requested but unavailable validation layer is not an error; it is
    /// logged and the instance is created without it.
    pub fn new(
        app_name: &CStr,
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let validation_available =
            enable_validation && Self::is_validation_layer_available(&entry)?;
        if enable_validation && !validation_available {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"subpass")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extensions = surface_extensions.to_vec();
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        Self::check_extension_support(&entry, &extensions)?;

        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Vulkan instance created ({} extension(s), validation: {})",
            extensions.len(),
            validation_available
        );

        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => (Some(debug_utils), Some(messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether the debug messenger is active.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Fails with the first requested extension the loader does not expose.
    fn check_extension_support(entry: &Entry, requested: &[*const c_char]) -> RhiResult<()> {
        let available = unsafe { entry.enumerate_instance_extension_properties(None)? };

        for &ptr in requested {
            let wanted = unsafe { CStr::from_ptr(ptr) };
            let found = available
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == wanted));
            if !found {
                return Err(RhiError::MissingExtension(
                    wanted.to_string_lossy().into_owned(),
                ));
            }
        }

        Ok(())
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties()? };

        Ok(layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        }))
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
        debug!("Debug messenger created");

        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Forwards validation messages to `tracing` at the matching level.
///
/// # Safety
///
/// Called by the Vulkan loader with a pointer valid for the duration of the call.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "general",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!(target: "vulkan", kind, "{}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!(target: "vulkan", kind, "{}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!(target: "vulkan", kind, "{}", message),
        _ => debug!(target: "vulkan", kind, "{}", message),
    }

    vk::FALSE
}

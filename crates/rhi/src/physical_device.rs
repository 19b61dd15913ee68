//! Physical device (GPU) selection.
//!
//! The selection process:
//! 1. Enumerate every GPU
//! 2. Find graphics and presentation queue families
//! 3. Check device extensions and swapchain adequacy when presenting to a surface
//! 4. Rank the survivors (discrete GPU first) and pick the best one
//!
//! The result is cached once in [`PhysicalDeviceInfo`] and never changes.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Device extensions required when presenting.
pub const PRESENT_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Surface that candidate devices must be able to present to.
#[derive(Clone, Copy)]
pub struct SurfaceTarget<'a> {
    pub loader: &'a ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
}

/// Queue family indices for graphics and presentation.
///
/// The two may alias the same family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both graphics and present families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Unique family indices, for one `VkDeviceQueueCreateInfo` each.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }
}

/// Information about the selected GPU, resolved once at startup.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
    /// Whether the device was checked against a surface and can present.
    pub presents: bool,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Whether anisotropic sampling can be enabled on this device.
    #[inline]
    pub fn supports_anisotropy(&self) -> bool {
        self.features.sampler_anisotropy == vk::TRUE
    }

    /// Total device-local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps_as_slice()
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .field("presents", &self.presents)
            .finish()
    }
}

/// Selects the most suitable physical device.
///
/// With a `surface`, candidates must present to it, expose
/// [`PRESENT_DEVICE_EXTENSIONS`] and offer at least one surface format and
/// present mode. Without one (headless use, tests) only a graphics queue is
/// required and it doubles as the present family.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if nothing qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<SurfaceTarget<'_>>,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface))
        .map(|info| {
            let score = rate_device(&info);
            debug!(
                "GPU '{}' ({}) - score {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .max_by_key(|(_, score)| *score);

    let Some((selected, score)) = best else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    info!(
        "Selected GPU: '{}' ({}), score {}, anisotropy: {}",
        selected.device_name(),
        selected.device_type_name(),
        score,
        selected.supports_anisotropy()
    );

    Ok(selected)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<SurfaceTarget<'_>>,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let queue_families = find_queue_families(instance, device, surface);
    if !queue_families.is_complete() {
        debug!(
            "GPU '{}' skipped: missing queue families (graphics={}, present={})",
            name,
            queue_families.graphics_family.is_some(),
            queue_families.present_family.is_some()
        );
        return None;
    }

    if let Some(target) = surface {
        if !supports_device_extensions(instance, device) {
            debug!("GPU '{}' skipped: missing swapchain extension", name);
            return None;
        }

        let adequate = SwapchainSupportDetails::query(target.loader, device, target.surface)
            .map(|details| details.is_adequate())
            .unwrap_or(false);
        if !adequate {
            debug!("GPU '{}' skipped: no surface formats or present modes", name);
            return None;
        }
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
        presents: surface.is_some(),
    })
}

fn supports_device_extensions(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(available) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };

    PRESENT_DEVICE_EXTENSIONS.iter().all(|required| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == *required))
    })
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<SurfaceTarget<'_>>,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        if indices.graphics_family.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics_family = Some(i);
        }

        if indices.present_family.is_none()
            && let Some(target) = surface
        {
            let supported = unsafe {
                target
                    .loader
                    .get_physical_device_surface_support(device, i, target.surface)
                    .unwrap_or(false)
            };
            if supported {
                indices.present_family = Some(i);
            }
        }

        if indices.is_complete() {
            break;
        }
    }

    if surface.is_none() {
        indices.present_family = indices.graphics_family;
    }

    indices
}

/// Higher is better. Discrete GPUs dominate, then VRAM breaks ties.
fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let type_score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    let vram_mb = (info.device_local_memory() / (1024 * 1024)).min(8_000) as u32;
    let anisotropy = if info.supports_anisotropy() { 50 } else { 0 };

    type_score + vram_mb / 10 + anisotropy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with(device_type: vk::PhysicalDeviceType, anisotropy: bool) -> PhysicalDeviceInfo {
        let properties = vk::PhysicalDeviceProperties {
            device_type,
            ..Default::default()
        };
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: if anisotropy { vk::TRUE } else { vk::FALSE },
            ..Default::default()
        };
        PhysicalDeviceInfo {
            device: vk::PhysicalDevice::null(),
            properties,
            features,
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            queue_families: QueueFamilyIndices {
                graphics_family: Some(0),
                present_family: Some(0),
            },
            presents: true,
        }
    }

    #[test]
    fn test_queue_family_indices_default_incomplete() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_empty());
    }

    #[test]
    fn test_queue_family_needs_both() {
        let graphics_only = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(!graphics_only.is_complete());

        let both = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert!(both.is_complete());
        assert_eq!(both.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_aliased_families_collapse() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(1),
            present_family: Some(1),
        };
        assert_eq!(indices.unique_families(), vec![1]);
    }

    #[test]
    fn test_discrete_outranks_integrated() {
        let discrete = info_with(vk::PhysicalDeviceType::DISCRETE_GPU, false);
        let integrated = info_with(vk::PhysicalDeviceType::INTEGRATED_GPU, true);
        assert!(rate_device(&discrete) > rate_device(&integrated));
    }

    #[test]
    fn test_anisotropy_flag() {
        assert!(info_with(vk::PhysicalDeviceType::CPU, true).supports_anisotropy());
        assert!(!info_with(vk::PhysicalDeviceType::CPU, false).supports_anisotropy());
    }
}

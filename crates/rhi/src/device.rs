//! Vulkan logical device and queue management.
//!
//! The [`Device`] owns the `VkDevice` and caches everything later stages need
//! from the physical device: memory properties for explicit memory-type
//! selection, enabled features and format-support queries. It is shared as
//! `Arc<Device>` by every RAII wrapper in this crate and must be dropped last.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::memory::find_memory_type_index;
use crate::physical_device::{PRESENT_DEVICE_EXTENSIONS, PhysicalDeviceInfo, QueueFamilyIndices};

/// Vulkan logical device wrapper.
pub struct Device {
    device: ash::Device,
    /// Kept for physical-device queries (format properties); the instance
    /// itself is owned elsewhere and outlives the device.
    instance: ash::Instance,
    physical: PhysicalDeviceInfo,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    anisotropy_enabled: bool,
}

impl Device {
    /// Creates a logical device with one queue per unique family.
    ///
    /// The swapchain extension is enabled when the physical device was
    /// selected against a surface. Sampler anisotropy is enabled when the
    /// device supports it.
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let queue_families = physical.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::NoSuitableGpu);
        };

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!("Creating queues for families {:?}", unique_families);

        let anisotropy_enabled = physical.supports_anisotropy();
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(anisotropy_enabled);

        let extension_names: Vec<*const std::ffi::c_char> = if physical.presents {
            PRESENT_DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect()
        } else {
            Vec::new()
        };

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical.device, &create_info, None)?
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        info!(
            "Logical device created (graphics family {}, present family {}, {} extension(s))",
            graphics_family,
            present_family,
            extension_names.len()
        );

        Ok(Arc::new(Self {
            device,
            instance: instance.handle().clone(),
            physical: physical.clone(),
            graphics_queue,
            present_queue,
            anisotropy_enabled,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical.device
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.physical.queue_families
    }

    /// Whether `samplerAnisotropy` was enabled at device creation.
    #[inline]
    pub fn anisotropy_enabled(&self) -> bool {
        self.anisotropy_enabled
    }

    /// Memory type index for an allocation, see [`find_memory_type_index`].
    pub fn memory_type_index(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<u32> {
        find_memory_type_index(&self.physical.memory_properties, type_bits, properties)
    }

    /// First candidate format whose tiling features contain `features`.
    ///
    /// # Errors
    ///
    /// [`RhiError::UnsupportedFormat`] if none of the candidates qualifies.
    pub fn choose_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> RhiResult<vk::Format> {
        select_format(candidates, tiling, features, |format| unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical.device, format)
        })
    }

    /// Blocks until all queues on the device are idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device and ash::Instance are function tables plus handles;
// queues and physical handles are plain values.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

/// Format selection over an arbitrary property source.
pub(crate) fn select_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties_of: impl Fn(vk::Format) -> vk::FormatProperties,
) -> RhiResult<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let properties = properties_of(format);
            match tiling {
                vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| RhiError::UnsupportedFormat {
            candidates: candidates.to_vec(),
            features,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPTH_CANDIDATES: [vk::Format; 3] = [
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
    ];

    #[test]
    fn test_select_format_skips_unsupported() {
        let chosen = select_format(
            &DEPTH_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| {
                if format == vk::Format::D32_SFLOAT {
                    vk::FormatProperties {
                        optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                        ..Default::default()
                    }
                } else {
                    vk::FormatProperties::default()
                }
            },
        )
        .unwrap();

        assert_eq!(chosen, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_select_format_respects_tiling() {
        let linear_only = |_| vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::COLOR_ATTACHMENT,
            ..Default::default()
        };

        assert!(
            select_format(
                &[vk::Format::R8G8B8A8_UNORM],
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::COLOR_ATTACHMENT,
                linear_only,
            )
            .is_err()
        );
        assert_eq!(
            select_format(
                &[vk::Format::R8G8B8A8_UNORM],
                vk::ImageTiling::LINEAR,
                vk::FormatFeatureFlags::COLOR_ATTACHMENT,
                linear_only,
            )
            .unwrap(),
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_select_format_none_is_capability_error() {
        let err = select_format(
            &DEPTH_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| vk::FormatProperties::default(),
        )
        .unwrap_err();

        assert!(err.is_capability());
        assert!(matches!(err, RhiError::UnsupportedFormat { ref candidates, .. } if candidates.len() == 3));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}

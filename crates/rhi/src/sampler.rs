//! Texture sampler.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Anisotropy level used when the device has the feature enabled.
pub const MAX_ANISOTROPY: f32 = 16.0;

/// Sampler settings shared by every texture: linear filtering, repeat
/// addressing, a single LOD and opaque-black border.
pub fn texture_sampler_info(anisotropy: bool) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0)
        .anisotropy_enable(anisotropy)
        .max_anisotropy(if anisotropy { MAX_ANISOTROPY } else { 1.0 })
}

/// Vulkan sampler wrapper.
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Creates the texture sampler, with anisotropy when the device enabled it.
    pub fn new_texture(device: Arc<Device>) -> RhiResult<Self> {
        let info = texture_sampler_info(device.anisotropy_enabled());
        let sampler = unsafe { device.handle().create_sampler(&info, None)? };
        debug!(
            "Texture sampler created (anisotropy: {})",
            device.anisotropy_enabled()
        );
        Ok(Self { device, sampler })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_settings() {
        let info = texture_sampler_info(true);
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.min_filter, vk::Filter::LINEAR);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.address_mode_w, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.border_color, vk::BorderColor::INT_OPAQUE_BLACK);
        assert_eq!(info.max_lod, 0.0);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.max_anisotropy, 16.0);
    }

    #[test]
    fn test_sampler_without_anisotropy() {
        let info = texture_sampler_info(false);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
        assert_eq!(info.max_anisotropy, 1.0);
    }
}

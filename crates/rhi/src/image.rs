//! Device-local 2D images with a dedicated allocation and a single view.
//!
//! Used for the per-swapchain-image intermediate color and depth attachments
//! and for sampled textures. All images have one mip level and one layer,
//! optimal tiling, and start in `UNDEFINED` layout.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::memory::DeviceMemory;

/// Candidate formats for the intermediate color attachment.
pub const COLOR_ATTACHMENT_FORMATS: [vk::Format; 1] = [vk::Format::R8G8B8A8_UNORM];

/// Candidate formats for the depth attachment, in order of preference.
pub const DEPTH_ATTACHMENT_FORMATS: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// What an image is for; selects usage flags and view aspect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    /// Written in the geometry subpass, read as an input attachment afterwards
    ColorAttachment,
    /// Depth written in the geometry subpass, read as an input attachment afterwards
    DepthAttachment,
    /// Filled by a transfer and sampled in fragment shaders
    Texture,
}

impl ImageKind {
    pub fn usage(self) -> vk::ImageUsageFlags {
        match self {
            ImageKind::ColorAttachment => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT
            }
            ImageKind::DepthAttachment => {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                    | vk::ImageUsageFlags::INPUT_ATTACHMENT
            }
            ImageKind::Texture => {
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED
            }
        }
    }

    pub fn aspect(self) -> vk::ImageAspectFlags {
        match self {
            ImageKind::DepthAttachment => vk::ImageAspectFlags::DEPTH,
            ImageKind::ColorAttachment | ImageKind::Texture => vk::ImageAspectFlags::COLOR,
        }
    }

    /// Format feature the chosen format must support with optimal tiling.
    pub fn required_feature(self) -> vk::FormatFeatureFlags {
        match self {
            ImageKind::ColorAttachment => vk::FormatFeatureFlags::COLOR_ATTACHMENT,
            ImageKind::DepthAttachment => vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ImageKind::Texture => vk::FormatFeatureFlags::SAMPLED_IMAGE,
        }
    }
}

/// A `VkImage` with its own memory and view.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    // Dropped after the image is destroyed.
    _memory: DeviceMemory,
    format: vk::Format,
    extent: vk::Extent2D,
    kind: ImageKind,
}

impl Image {
    /// Creates a device-local image, binds memory and creates its view.
    ///
    /// Anything created before a failing step is released before returning.
    pub fn new(
        device: Arc<Device>,
        kind: ImageKind,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "image extent must be non-zero, got {}x{}",
                extent.width, extent.height
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(kind.usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        let built = Self::bind_and_view(&device, image, kind, format);
        let (memory, view) = match built {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        debug!(
            "Created {:?} image {}x{} ({:?})",
            kind, extent.width, extent.height, format
        );

        Ok(Self {
            device,
            image,
            view,
            _memory: memory,
            format,
            extent,
            kind,
        })
    }

    fn bind_and_view(
        device: &Arc<Device>,
        image: vk::Image,
        kind: ImageKind,
        format: vk::Format,
    ) -> RhiResult<(DeviceMemory, vk::ImageView)> {
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };
        let memory = DeviceMemory::allocate(
            device.clone(),
            requirements,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        unsafe {
            device
                .handle()
                .bind_image_memory(image, memory.handle(), 0)?
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(kind.aspect())
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        let view = unsafe { device.handle().create_image_view(&view_info, None)? };

        Ok((memory, view))
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn kind(&self) -> ImageKind {
        self.kind
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
            self.device.handle().destroy_image(self.image, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachments_are_readable_as_input_attachments() {
        for kind in [ImageKind::ColorAttachment, ImageKind::DepthAttachment] {
            assert!(kind.usage().contains(vk::ImageUsageFlags::INPUT_ATTACHMENT));
        }
        assert!(
            ImageKind::ColorAttachment
                .usage()
                .contains(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        );
        assert!(
            ImageKind::DepthAttachment
                .usage()
                .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        );
    }

    #[test]
    fn test_texture_usage() {
        assert_eq!(
            ImageKind::Texture.usage(),
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED
        );
    }

    #[test]
    fn test_depth_view_aspect() {
        assert_eq!(
            ImageKind::DepthAttachment.aspect(),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(ImageKind::Texture.aspect(), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_depth_candidates_order() {
        assert_eq!(DEPTH_ATTACHMENT_FORMATS[0], vk::Format::D32_SFLOAT_S8_UINT);
        assert_eq!(COLOR_ATTACHMENT_FORMATS, [vk::Format::R8G8B8A8_UNORM]);
    }
}

//! Intermediate render targets for the geometry subpass.
//!
//! The geometry subpass writes color and depth into images that the composite
//! subpass reads back as input attachments. Each swapchain image gets its own
//! pair so that frames in flight never share a target.
//!
//! # Overview
//!
//! - [`AttachmentFormats`] picks the color and depth formats once per device
//! - [`AttachmentResource`] is one color/depth pair
//! - [`AttachmentArena`] holds one pair per swapchain image, indexed by image
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use subpass_rhi::device::Device;
//! use subpass_rhi::vk;
//! use subpass_renderer::attachments::{AttachmentArena, AttachmentFormats};
//!
//! # fn example(device: Arc<Device>) -> Result<(), subpass_rhi::RhiError> {
//! let formats = AttachmentFormats::choose(&device)?;
//! let extent = vk::Extent2D { width: 800, height: 600 };
//! let arena = AttachmentArena::new(device, formats, extent, 3)?;
//! assert_eq!(arena.len(), 3);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use subpass_rhi::RhiResult;
use subpass_rhi::device::Device;
use subpass_rhi::image::{COLOR_ATTACHMENT_FORMATS, DEPTH_ATTACHMENT_FORMATS, Image, ImageKind};
use subpass_rhi::render_pass::{COLOR_ATTACHMENT, DEPTH_ATTACHMENT, SWAPCHAIN_ATTACHMENT};

/// Formats chosen for the intermediate attachments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentFormats {
    pub color: vk::Format,
    pub depth: vk::Format,
}

impl AttachmentFormats {
    /// First supported candidate for each attachment.
    ///
    /// # Errors
    ///
    /// [`subpass_rhi::RhiError::UnsupportedFormat`] when no candidate supports
    /// attachment use with optimal tiling.
    pub fn choose(device: &Device) -> RhiResult<Self> {
        let color = device.choose_supported_format(
            &COLOR_ATTACHMENT_FORMATS,
            vk::ImageTiling::OPTIMAL,
            ImageKind::ColorAttachment.required_feature(),
        )?;
        let depth = device.choose_supported_format(
            &DEPTH_ATTACHMENT_FORMATS,
            vk::ImageTiling::OPTIMAL,
            ImageKind::DepthAttachment.required_feature(),
        )?;

        info!("Attachment formats: color {:?}, depth {:?}", color, depth);
        Ok(Self { color, depth })
    }
}

/// Color and depth targets for one swapchain image.
pub struct AttachmentResource {
    pub color: Image,
    pub depth: Image,
}

impl AttachmentResource {
    fn new(device: &Arc<Device>, formats: AttachmentFormats, extent: vk::Extent2D) -> RhiResult<Self> {
        let color = Image::new(device.clone(), ImageKind::ColorAttachment, formats.color, extent)?;
        let depth = Image::new(device.clone(), ImageKind::DepthAttachment, formats.depth, extent)?;
        Ok(Self { color, depth })
    }

    /// Views in input-attachment binding order: color, then depth.
    pub fn input_views(&self) -> [vk::ImageView; 2] {
        [self.color.view(), self.depth.view()]
    }

    /// Framebuffer views for this pair presenting into `swapchain_view`.
    pub fn framebuffer_views(&self, swapchain_view: vk::ImageView) -> [vk::ImageView; 3] {
        framebuffer_views(swapchain_view, self.color.view(), self.depth.view())
    }
}

/// Orders views by render-pass attachment index.
pub fn framebuffer_views(
    swapchain: vk::ImageView,
    color: vk::ImageView,
    depth: vk::ImageView,
) -> [vk::ImageView; 3] {
    let mut views = [vk::ImageView::null(); 3];
    views[SWAPCHAIN_ATTACHMENT as usize] = swapchain;
    views[COLOR_ATTACHMENT as usize] = color;
    views[DEPTH_ATTACHMENT as usize] = depth;
    views
}

/// One [`AttachmentResource`] per swapchain image.
///
/// Color and depth live in the same record, so the per-image counts cannot
/// drift apart.
pub struct AttachmentArena {
    formats: AttachmentFormats,
    extent: vk::Extent2D,
    targets: Vec<AttachmentResource>,
}

impl AttachmentArena {
    /// Creates `count` color/depth pairs of size `extent`.
    ///
    /// On failure every pair created so far is released.
    pub fn new(
        device: Arc<Device>,
        formats: AttachmentFormats,
        extent: vk::Extent2D,
        count: usize,
    ) -> RhiResult<Self> {
        let targets = (0..count)
            .map(|_| AttachmentResource::new(&device, formats, extent))
            .collect::<RhiResult<Vec<_>>>()?;

        debug!(
            "Created {} attachment pair(s) at {}x{}",
            targets.len(),
            extent.width,
            extent.height
        );

        Ok(Self {
            formats,
            extent,
            targets,
        })
    }

    #[inline]
    pub fn formats(&self) -> AttachmentFormats {
        self.formats
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Targets for swapchain image `image_index`.
    #[inline]
    pub fn get(&self, image_index: usize) -> Option<&AttachmentResource> {
        self.targets.get(image_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttachmentResource> {
        self.targets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_framebuffer_views_follow_attachment_indices() {
        let swapchain = vk::ImageView::from_raw(1);
        let color = vk::ImageView::from_raw(2);
        let depth = vk::ImageView::from_raw(3);

        let views = framebuffer_views(swapchain, color, depth);
        assert_eq!(views[SWAPCHAIN_ATTACHMENT as usize], swapchain);
        assert_eq!(views[COLOR_ATTACHMENT as usize], color);
        assert_eq!(views[DEPTH_ATTACHMENT as usize], depth);
    }
}

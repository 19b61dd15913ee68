//! Blocking one-shot transfers on the graphics queue.
//!
//! Every operation here records a single command buffer, submits it and waits
//! for the queue to go idle before returning. That is acceptable for load-time
//! uploads and nothing else.

use std::sync::Arc;

use ash::vk;
use tracing::trace;

use crate::buffer::Buffer;
use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Access masks and pipeline stages for one image layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier parameters for the two transitions an upload needs.
///
/// # Errors
///
/// [`RhiError::UnsupportedLayoutTransition`] for any other pair.
pub fn layout_transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RhiResult<TransitionMasks> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            })
        }
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        (old, new) => Err(RhiError::UnsupportedLayoutTransition { old, new }),
    }
}

/// Owns a transient pool and the queue that uploads are submitted to.
pub struct TransferContext {
    device: Arc<Device>,
    queue: vk::Queue,
    pool: CommandPool,
}

impl TransferContext {
    /// Creates a context submitting to the device's graphics queue.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let family = device
            .queue_families()
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let pool = CommandPool::new_transient(device.clone(), family)?;
        let queue = device.graphics_queue();
        Ok(Self {
            device,
            queue,
            pool,
        })
    }

    /// Records with `record`, submits, waits for idle and frees the buffer.
    ///
    /// The command buffer is freed on every path, including failures.
    pub fn one_shot<F>(&self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        let buffers = self.pool.allocate(1)?;
        let result = self.submit_and_wait(&buffers, record);
        self.pool.free(&buffers);
        result
    }

    fn submit_and_wait<F>(&self, buffers: &[CommandBuffer], record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        let cmd = buffers.first().ok_or_else(|| {
            RhiError::InvalidArgument("command buffer allocation returned nothing".into())
        })?;

        cmd.begin_one_time()?;
        record(cmd)?;
        cmd.end()?;

        let handles = [cmd.handle()];
        let submit = vk::SubmitInfo::default().command_buffers(&handles);
        unsafe {
            self.device
                .handle()
                .queue_submit(self.queue, &[submit], vk::Fence::null())?;
            self.device.handle().queue_wait_idle(self.queue)?;
        }
        Ok(())
    }

    /// Copies `size` bytes from the start of `src` to the start of `dst`.
    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer, size: vk::DeviceSize) -> RhiResult<()> {
        if size > src.size() || size > dst.size() {
            return Err(RhiError::InvalidArgument(format!(
                "copy of {} bytes exceeds source ({}) or destination ({})",
                size,
                src.size(),
                dst.size()
            )));
        }

        self.one_shot(|cmd| {
            let region = vk::BufferCopy::default().size(size);
            cmd.copy_buffer(src.handle(), dst.handle(), &[region]);
            Ok(())
        })?;
        trace!("Copied {} bytes buffer-to-buffer", size);
        Ok(())
    }

    /// Copies tightly packed pixels into mip 0, layer 0 of a color image.
    ///
    /// The image must already be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(
        &self,
        src: &Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        self.one_shot(|cmd| {
            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                });
            cmd.copy_buffer_to_image(src.handle(), image, &[region]);
            Ok(())
        })
    }

    /// Moves a single-mip color image between the supported upload layouts.
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> RhiResult<()> {
        let masks = layout_transition_masks(old, new)?;

        self.one_shot(|cmd| {
            let barrier = vk::ImageMemoryBarrier::default()
                .old_layout(old)
                .new_layout(new)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .src_access_mask(masks.src_access)
                .dst_access_mask(masks.dst_access);
            cmd.pipeline_barrier(masks.src_stage, masks.dst_stage, &[barrier]);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_to_transfer_dst() {
        let masks = layout_transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::empty());
        assert_eq!(masks.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn test_transfer_dst_to_shader_read() {
        let masks = layout_transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_other_transitions_are_rejected() {
        let pairs = [
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            (
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            (
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
        ];
        for (old, new) in pairs {
            let err = layout_transition_masks(old, new).unwrap_err();
            assert!(
                matches!(err, RhiError::UnsupportedLayoutTransition { old: o, new: n } if o == old && n == new)
            );
        }
    }
}

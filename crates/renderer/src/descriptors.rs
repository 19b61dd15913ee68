//! Descriptor layouts, pools and the per-swapchain-image sets.
//!
//! Three independent pools exist. The uniform and input-attachment pools
//! live here and hold exactly one set per swapchain image; the sampler pool
//! belongs to [`crate::texture::TextureStore`]. Sets are allocated once and
//! only their contents change afterwards.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use subpass_rhi::buffer::{Buffer, BufferUsage};
use subpass_rhi::descriptor::{
    DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout, pool_size,
    write_input_attachments, write_uniform_buffer,
};
use subpass_rhi::device::Device;
use subpass_rhi::{RhiError, RhiResult};

use crate::attachments::AttachmentArena;
use crate::ubo::ViewProjection;

/// Input attachments read by the composite subpass: color and depth.
pub const INPUT_ATTACHMENT_COUNT: u32 = 2;

/// Set layouts shared by both pipelines.
pub struct DescriptorLayouts {
    /// Set 0 of the geometry pipeline: view/projection uniform.
    pub uniform: DescriptorSetLayout,
    /// Set 1 of the geometry pipeline: one texture.
    pub sampler: DescriptorSetLayout,
    /// Set 0 of the composite pipeline: color and depth inputs.
    pub input: DescriptorSetLayout,
}

impl DescriptorLayouts {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let uniform = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::uniform_buffer(
                0,
                vk::ShaderStageFlags::VERTEX,
            )],
        )?;
        let sampler = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::combined_image_sampler(
                0,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;
        let input_bindings: Vec<_> = (0..INPUT_ATTACHMENT_COUNT)
            .map(DescriptorBindingBuilder::input_attachment)
            .collect();
        let input = DescriptorSetLayout::new(device, &input_bindings)?;

        Ok(Self {
            uniform,
            sampler,
            input,
        })
    }
}

/// Uniform pool: one uniform buffer per swapchain image.
pub fn uniform_pool_sizes(image_count: u32) -> [vk::DescriptorPoolSize; 1] {
    [pool_size(vk::DescriptorType::UNIFORM_BUFFER, image_count)]
}

/// Input pool: color and depth input attachments per swapchain image.
pub fn input_pool_sizes(image_count: u32) -> [vk::DescriptorPoolSize; 1] {
    [pool_size(
        vk::DescriptorType::INPUT_ATTACHMENT,
        image_count * INPUT_ATTACHMENT_COUNT,
    )]
}

/// Per-swapchain-image uniform buffers and descriptor sets.
pub struct FrameDescriptors {
    uniform_buffers: Vec<Buffer>,
    uniform_sets: Vec<vk::DescriptorSet>,
    input_sets: Vec<vk::DescriptorSet>,
    // Sets are freed with their pools, after the buffers above.
    _uniform_pool: DescriptorPool,
    _input_pool: DescriptorPool,
}

impl FrameDescriptors {
    /// Allocates and writes one uniform set and one input set per attachment pair.
    pub fn new(
        device: Arc<Device>,
        layouts: &DescriptorLayouts,
        attachments: &AttachmentArena,
    ) -> RhiResult<Self> {
        let image_count = attachments.len() as u32;
        if image_count == 0 {
            return Err(RhiError::InvalidArgument(
                "no swapchain images to allocate descriptors for".into(),
            ));
        }

        let uniform_pool = DescriptorPool::new(
            device.clone(),
            image_count,
            &uniform_pool_sizes(image_count),
        )?;
        let input_pool =
            DescriptorPool::new(device.clone(), image_count, &input_pool_sizes(image_count))?;

        let uniform_buffers = (0..image_count)
            .map(|_| {
                Buffer::with_usage(
                    device.clone(),
                    BufferUsage::Uniform,
                    ViewProjection::SIZE as u64,
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let uniform_layouts = vec![layouts.uniform.handle(); image_count as usize];
        let uniform_sets = uniform_pool.allocate(&uniform_layouts)?;
        for (set, buffer) in uniform_sets.iter().zip(&uniform_buffers) {
            write_uniform_buffer(&device, *set, 0, buffer.handle(), buffer.size());
        }

        let input_layouts = vec![layouts.input.handle(); image_count as usize];
        let input_sets = input_pool.allocate(&input_layouts)?;
        for (set, target) in input_sets.iter().zip(attachments.iter()) {
            write_input_attachments(&device, *set, &target.input_views());
        }

        debug!(
            "Frame descriptors ready for {} swapchain image(s)",
            image_count
        );

        Ok(Self {
            uniform_buffers,
            uniform_sets,
            input_sets,
            _uniform_pool: uniform_pool,
            _input_pool: input_pool,
        })
    }

    /// Writes the view/projection block of swapchain image `image_index`.
    ///
    /// Host-coherent memory, so no flush is needed.
    pub fn update_uniform(&self, image_index: usize, data: &ViewProjection) -> RhiResult<()> {
        let buffer = self
            .uniform_buffers
            .get(image_index)
            .ok_or_else(|| out_of_range(image_index, self.uniform_buffers.len()))?;
        buffer.write(std::slice::from_ref(data))
    }

    pub fn uniform_set(&self, image_index: usize) -> Option<vk::DescriptorSet> {
        self.uniform_sets.get(image_index).copied()
    }

    pub fn input_set(&self, image_index: usize) -> Option<vk::DescriptorSet> {
        self.input_sets.get(image_index).copied()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.uniform_sets.len()
    }
}

fn out_of_range(index: usize, len: usize) -> RhiError {
    RhiError::InvalidArgument(format!(
        "swapchain image index {} out of range ({} images)",
        index, len
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pools_are_sized_per_image() {
        let uniform = uniform_pool_sizes(3);
        assert_eq!(uniform[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(uniform[0].descriptor_count, 3);

        let input = input_pool_sizes(3);
        assert_eq!(input[0].ty, vk::DescriptorType::INPUT_ATTACHMENT);
        assert_eq!(input[0].descriptor_count, 6);
    }

    #[test]
    fn test_out_of_range_names_index() {
        let err = out_of_range(4, 3);
        assert!(err.to_string().contains('4'));
        assert!(!err.is_capability());
    }
}

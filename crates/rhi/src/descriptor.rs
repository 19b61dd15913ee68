//! Descriptor set management for shader resource binding.
//!
//! - [`DescriptorSetLayout`] defines the layout of shader bindings
//! - [`DescriptorPool`] is a fixed-capacity pool sets are allocated from once
//! - [`DescriptorBindingBuilder`] and the `write_*` helpers build bindings and
//!   point sets at buffers, sampled images and input attachments
//!
//! Pools here are sized up front and never free individual sets; every set
//! lives until its pool is destroyed.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool for allocating descriptor sets.
///
/// Not thread-safe; allocation happens on the render thread during setup
/// and texture loading.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a pool able to hold `max_sets` sets drawn from `pool_sizes`.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        if max_sets == 0 {
            return Err(RhiError::InvalidArgument(
                "descriptor pool must allow at least one set".into(),
            ));
        }

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={:?}",
            max_sets,
            pool_sizes
                .iter()
                .map(|s| (s.ty, s.descriptor_count))
                .collect::<Vec<_>>()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates one set per entry of `layouts`.
    ///
    /// # Errors
    ///
    /// Returns the Vulkan error when the pool is exhausted
    /// (`ERROR_OUT_OF_POOL_MEMORY`) or allocation otherwise fails.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }

    /// Allocates a single set.
    pub fn allocate_one(&self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        self.allocate(&[layout])?
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidArgument("descriptor allocation returned no set".into()))
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool (max_sets={})", self.max_sets);
    }
}

/// Pool size entry for `count` descriptors of type `ty`.
#[inline]
pub fn pool_size(ty: vk::DescriptorType, count: u32) -> vk::DescriptorPoolSize {
    vk::DescriptorPoolSize::default()
        .ty(ty)
        .descriptor_count(count)
}

/// Points `binding` of `set` at the whole of `buffer` as a uniform buffer.
pub fn write_uniform_buffer(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: vk::DeviceSize,
) {
    let buffer_infos = [buffer_info(buffer, 0, range)];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(&buffer_infos);

    unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
}

/// Binds a sampled image in `SHADER_READ_ONLY_OPTIMAL` with `sampler`.
pub fn write_combined_image_sampler(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    sampler: vk::Sampler,
    view: vk::ImageView,
) {
    let image_infos = [image_info(
        sampler,
        view,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(&image_infos);

    unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
}

/// Binds each view to consecutive bindings starting at 0 as input
/// attachments read in `SHADER_READ_ONLY_OPTIMAL`.
pub fn write_input_attachments(device: &Device, set: vk::DescriptorSet, views: &[vk::ImageView]) {
    let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = views
        .iter()
        .map(|&view| {
            [image_info(
                vk::Sampler::null(),
                view,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )]
        })
        .collect();

    let writes: Vec<vk::WriteDescriptorSet<'_>> = image_infos
        .iter()
        .enumerate()
        .map(|(binding, info)| {
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(binding as u32)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
                .image_info(info)
        })
        .collect();

    unsafe { device.handle().update_descriptor_sets(&writes, &[]) };
}

#[inline]
pub fn buffer_info(
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    range: vk::DeviceSize,
) -> vk::DescriptorBufferInfo {
    vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range)
}

#[inline]
pub fn image_info(
    sampler: vk::Sampler,
    image_view: vk::ImageView,
    image_layout: vk::ImageLayout,
) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .sampler(sampler)
        .image_view(image_view)
        .image_layout(image_layout)
}

/// Shorthand constructors for single-descriptor layout bindings.
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    #[inline]
    pub fn combined_image_sampler(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            stage_flags,
        )
    }

    /// Input attachments are only readable from fragment shaders.
    #[inline]
    pub fn input_attachment(binding: u32) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(
            binding,
            vk::DescriptorType::INPUT_ATTACHMENT,
            vk::ShaderStageFlags::FRAGMENT,
        )
    }

    fn single(
        binding: u32,
        ty: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(ty)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_binding_builder_uniform_buffer() {
        let binding = DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_descriptor_binding_builder_combined_image_sampler() {
        let binding =
            DescriptorBindingBuilder::combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(
            binding.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_input_attachment_binding_is_fragment_only() {
        let binding = DescriptorBindingBuilder::input_attachment(1);
        assert_eq!(binding.binding, 1);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::INPUT_ATTACHMENT);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_pool_size_helper() {
        let size = pool_size(vk::DescriptorType::INPUT_ATTACHMENT, 3);
        assert_eq!(size.ty, vk::DescriptorType::INPUT_ATTACHMENT);
        assert_eq!(size.descriptor_count, 3);
    }

    #[test]
    fn test_buffer_info_helper() {
        let info = buffer_info(vk::Buffer::null(), 64, 128);
        assert_eq!(info.buffer, vk::Buffer::null());
        assert_eq!(info.offset, 64);
        assert_eq!(info.range, 128);
    }
}

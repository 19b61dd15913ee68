//! Explicit device-memory selection and allocation.
//!
//! Every buffer and image in this crate is backed by its own `VkDeviceMemory`
//! allocation whose memory type is picked by [`find_memory_type_index`]. The
//! [`DeviceMemory`] owner frees the allocation on drop, so a multi-step
//! resource build that fails halfway leaves nothing behind.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Index of the first memory type allowed by `type_bits` whose property flags
/// contain `required`.
///
/// `type_bits` is the `memoryTypeBits` mask from `VkMemoryRequirements`: bit
/// `i` set means memory type `i` may back the resource.
///
/// # Errors
///
/// [`RhiError::NoSuitableMemoryType`] if no type qualifies. This indicates a
/// driver or feature mismatch and is not retried.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> RhiResult<u32> {
    memory_properties
        .memory_types_as_slice()
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_bits & (1 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
        .ok_or(RhiError::NoSuitableMemoryType {
            type_bits,
            properties: required,
        })
}

/// An owned `VkDeviceMemory` allocation.
pub struct DeviceMemory {
    device: Arc<Device>,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    properties: vk::MemoryPropertyFlags,
}

impl DeviceMemory {
    /// Allocates memory satisfying `requirements` with the given properties.
    pub fn allocate(
        device: Arc<Device>,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<Self> {
        let memory_type_index =
            device.memory_type_index(requirements.memory_type_bits, properties)?;

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.handle().allocate_memory(&allocate_info, None)? };

        Ok(Self {
            device,
            memory,
            size: requirements.size,
            properties,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Whether the host can map this allocation.
    #[inline]
    pub fn is_host_visible(&self) -> bool {
        self.properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Copies `data` to the start of the allocation with map/copy/unmap.
    ///
    /// The allocation must be host-visible and coherent; no flush is issued.
    pub fn write<T: Pod>(&self, data: &[T]) -> RhiResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.check_mappable(bytes.len())?;
        if bytes.is_empty() {
            return Ok(());
        }

        unsafe {
            let ptr = self.device.handle().map_memory(
                self.memory,
                0,
                bytes.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.device.handle().unmap_memory(self.memory);
        }

        Ok(())
    }

    /// Reads `count` elements from the start of the allocation.
    pub fn read<T: Pod>(&self, count: usize) -> RhiResult<Vec<T>> {
        let byte_len = count * std::mem::size_of::<T>();
        self.check_mappable(byte_len)?;

        let mut out = vec![T::zeroed(); count];
        if byte_len == 0 {
            return Ok(out);
        }

        unsafe {
            let ptr = self.device.handle().map_memory(
                self.memory,
                0,
                byte_len as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(
                ptr.cast::<u8>(),
                bytemuck::cast_slice_mut::<T, u8>(&mut out).as_mut_ptr(),
                byte_len,
            );
            self.device.handle().unmap_memory(self.memory);
        }

        Ok(out)
    }

    fn check_mappable(&self, len: usize) -> RhiResult<()> {
        if !self.is_host_visible() {
            return Err(RhiError::InvalidArgument(
                "cannot map device-local memory".into(),
            ));
        }
        if len as vk::DeviceSize > self.size {
            return Err(RhiError::InvalidArgument(format!(
                "mapping {} bytes exceeds allocation of {} bytes",
                len, self.size
            )));
        }
        Ok(())
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A typical discrete-GPU layout: device-local, host-visible/coherent,
    /// host-visible/cached, and device-local+host-visible (BAR).
    fn sample_properties() -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 4,
            ..Default::default()
        };
        let flags = [
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
        ];
        for (i, f) in flags.into_iter().enumerate() {
            props.memory_types[i].property_flags = f;
        }
        props
    }

    #[test]
    fn test_first_matching_type_wins() {
        let props = sample_properties();
        let index = find_memory_type_index(
            &props,
            0b1111,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_type_bits_mask_excludes_types() {
        let props = sample_properties();
        let index = find_memory_type_index(
            &props,
            0b1100,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .unwrap();
        assert_eq!(index, 2);

        let device_local =
            find_memory_type_index(&props, 0b1000, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(device_local, 3);
    }

    #[test]
    fn test_result_satisfies_mask_and_superset_for_every_combination() {
        let props = sample_properties();
        let wanted = [
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ];

        for mask in 0u32..16 {
            for &required in &wanted {
                match find_memory_type_index(&props, mask, required) {
                    Ok(i) => {
                        assert_ne!(mask & (1 << i), 0, "index {} not allowed by {:#b}", i, mask);
                        assert!(props.memory_types[i as usize].property_flags.contains(required));
                    }
                    Err(RhiError::NoSuitableMemoryType { type_bits, .. }) => {
                        assert_eq!(type_bits, mask);
                        let exists = (0..4).any(|i| {
                            mask & (1 << i) != 0
                                && props.memory_types[i].property_flags.contains(required)
                        });
                        assert!(!exists, "a valid type existed for {:#b} {:?}", mask, required);
                    }
                    Err(e) => panic!("unexpected error {:?}", e),
                }
            }
        }
    }

    #[test]
    fn test_absent_combination_fails() {
        let props = sample_properties();
        let err = find_memory_type_index(
            &props,
            u32::MAX,
            vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
        )
        .unwrap_err();
        assert!(err.is_capability());
    }

    #[test]
    fn test_bits_beyond_type_count_are_ignored() {
        let props = sample_properties();
        // Bit 5 set but only four memory types exist.
        assert!(
            find_memory_type_index(&props, 1 << 5, vk::MemoryPropertyFlags::empty()).is_err()
        );
    }
}

//! GPU buffer management.
//!
//! A [`Buffer`] is a `VkBuffer` bound to its own [`DeviceMemory`]. Creation is
//! the three-step create / query requirements / allocate-and-bind sequence; if
//! any step fails, whatever was already created is released by its owner.
//!
//! Device-local buffers are filled through a host-visible staging buffer and a
//! blocking copy on the transfer queue (see [`Buffer::device_local_with_data`]).
//! Host-visible buffers are written directly with map/copy/unmap.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::memory::DeviceMemory;
use crate::transfer::TransferContext;

/// Buffer usage type.
///
/// Selects both the Vulkan usage flags and the memory properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Device-local vertex data, filled by a transfer
    Vertex,
    /// Device-local index data, filled by a transfer
    Index,
    /// Host-visible uniform data, rewritten every frame
    Uniform,
    /// Host-visible source of a transfer
    Staging,
    /// Host-visible destination of a transfer, read back by the CPU
    Readback,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Memory properties the backing allocation must have.
    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            BufferUsage::Uniform | BufferUsage::Staging | BufferUsage::Readback => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// A `VkBuffer` with its own dedicated memory.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    memory: DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Creates a buffer and binds freshly allocated memory to it.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidArgument`] for a zero size
    /// - [`RhiError::NoSuitableMemoryType`] if the device has no matching memory
    /// - [`RhiError::VulkanError`] if creation, allocation or binding fails
    pub fn new(
        device: Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidArgument(
                "buffer size must be greater than 0".into(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let bound = DeviceMemory::allocate(device.clone(), requirements, properties).and_then(
            |memory| {
                unsafe {
                    device
                        .handle()
                        .bind_buffer_memory(buffer, memory.handle(), 0)?
                };
                Ok(memory)
            },
        );

        let memory = match bound {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        Ok(Self {
            device,
            buffer,
            memory,
            size,
        })
    }

    /// Creates a buffer with the flags and memory properties of `usage`.
    pub fn with_usage(
        device: Arc<Device>,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        let buffer = Self::new(device, size, usage.to_vk_usage(), usage.memory_properties())?;
        debug!("Created {} buffer: {} bytes", usage.name(), size);
        Ok(buffer)
    }

    /// Creates a host-visible buffer and fills it with `data`.
    pub fn host_with_data<T: Pod>(
        device: Arc<Device>,
        usage: BufferUsage,
        data: &[T],
    ) -> RhiResult<Self> {
        let buffer = Self::with_usage(device, usage, std::mem::size_of_val(data) as u64)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Creates a device-local buffer holding `data`.
    ///
    /// The data goes through a temporary staging buffer and a blocking
    /// buffer-to-buffer copy; the staging buffer is released before return.
    /// Intended for load-time uploads only.
    pub fn device_local_with_data<T: Pod>(
        device: Arc<Device>,
        transfer: &TransferContext,
        usage: BufferUsage,
        data: &[T],
    ) -> RhiResult<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let staging = Self::host_with_data(device.clone(), BufferUsage::Staging, data)?;
        let buffer = Self::with_usage(device, usage, size)?;

        transfer.copy_buffer(&staging, &buffer, size)?;

        Ok(buffer)
    }

    /// Writes `data` to the start of a host-visible buffer.
    pub fn write<T: Pod>(&self, data: &[T]) -> RhiResult<()> {
        let len = std::mem::size_of_val(data) as vk::DeviceSize;
        if len > self.size {
            return Err(RhiError::InvalidArgument(format!(
                "write of {} bytes exceeds buffer of {} bytes",
                len, self.size
            )));
        }
        self.memory.write(data)
    }

    /// Reads `count` elements from the start of a host-visible buffer.
    pub fn read<T: Pod>(&self, count: usize) -> RhiResult<Vec<T>> {
        self.memory.read(count)
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        // `memory` is freed after the buffer by field drop.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert_eq!(
            BufferUsage::Uniform.to_vk_usage(),
            vk::BufferUsageFlags::UNIFORM_BUFFER
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert_eq!(
            BufferUsage::Readback.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_DST
        );
    }

    #[test]
    fn test_geometry_lives_in_device_local_memory() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index] {
            let props = usage.memory_properties();
            assert!(props.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));
            assert!(!props.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        }
    }

    #[test]
    fn test_host_buffers_are_coherent() {
        for usage in [
            BufferUsage::Uniform,
            BufferUsage::Staging,
            BufferUsage::Readback,
        ] {
            assert!(usage.memory_properties().contains(
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            ));
        }
    }

    #[test]
    fn test_buffer_usage_name() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Staging.name(), "staging");
        assert_eq!(BufferUsage::Readback.name(), "readback");
    }
}

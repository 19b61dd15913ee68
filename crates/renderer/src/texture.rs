//! Sampled textures and their descriptor sets.
//!
//! Textures are owned by a [`TextureStore`] and referenced everywhere else by
//! [`TextureHandle`]. A handle carries the generation of the slot it was
//! issued for, so a handle to a removed texture never resolves to whatever
//! took its slot later. Handle 0 is the fallback texture loaded at startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use subpass_resources::TextureData;
use subpass_rhi::buffer::{Buffer, BufferUsage};
use subpass_rhi::descriptor::{DescriptorPool, pool_size, write_combined_image_sampler};
use subpass_rhi::device::Device;
use subpass_rhi::image::{Image, ImageKind};
use subpass_rhi::sampler::Sampler;
use subpass_rhi::transfer::TransferContext;

use crate::error::RenderResult;

/// Format every texture is uploaded in.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Weak reference to an entry of a [`HandleTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    index: u32,
    generation: u32,
}

impl TextureHandle {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generation-checked slot storage.
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Stores `value` and returns a fresh handle. Equal values get distinct handles.
    pub fn insert(&mut self, value: T) -> TextureHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return TextureHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        TextureHandle {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Removes the entry; every outstanding handle to it goes stale.
    pub fn remove(&mut self, handle: TextureHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live entries in slot order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| slot.value.as_ref())
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A GPU texture and the descriptor set that samples it.
pub struct Texture {
    pub name: String,
    pub image: Image,
    pub descriptor_set: vk::DescriptorSet,
}

/// Owns every texture, the shared sampler and the sampler descriptor pool.
pub struct TextureStore {
    device: Arc<Device>,
    // Textures hold sets from `pool`; dropping them first keeps teardown ordered.
    textures: HandleTable<Texture>,
    pool: DescriptorPool,
    sampler: Sampler,
    set_layout: vk::DescriptorSetLayout,
    texture_dir: PathBuf,
    fallback: Option<TextureHandle>,
}

impl TextureStore {
    /// Creates a store able to hold `capacity` textures.
    ///
    /// `set_layout` must describe a single combined image sampler at binding 0
    /// and outlive the store.
    pub fn new(
        device: Arc<Device>,
        set_layout: vk::DescriptorSetLayout,
        capacity: u32,
        texture_dir: &Path,
    ) -> RenderResult<Self> {
        let sampler = Sampler::new_texture(device.clone())?;
        let pool = DescriptorPool::new(
            device.clone(),
            capacity,
            &sampler_pool_sizes(capacity),
        )?;

        Ok(Self {
            device,
            textures: HandleTable::new(),
            pool,
            sampler,
            set_layout,
            texture_dir: texture_dir.to_path_buf(),
            fallback: None,
        })
    }

    /// Decodes `<texture_dir>/<name>` and uploads it.
    ///
    /// Loading the same name twice creates two textures.
    pub fn load(&mut self, transfer: &TransferContext, name: &str) -> RenderResult<TextureHandle> {
        let data = TextureData::load_rgba8(&self.texture_dir.join(name))?;
        self.upload(transfer, name, &data)
    }

    /// Loads the fallback texture. Later lookups of stale handles resolve to it.
    pub fn load_fallback(
        &mut self,
        transfer: &TransferContext,
        name: &str,
    ) -> RenderResult<TextureHandle> {
        let handle = self.load(transfer, name)?;
        self.fallback = Some(handle);
        info!("Fallback texture '{}' loaded", name);
        Ok(handle)
    }

    /// Uploads decoded pixels through a staging buffer and binds a sampler set.
    pub fn upload(
        &mut self,
        transfer: &TransferContext,
        name: &str,
        data: &TextureData,
    ) -> RenderResult<TextureHandle> {
        let extent = vk::Extent2D {
            width: data.width,
            height: data.height,
        };

        let staging =
            Buffer::host_with_data(self.device.clone(), BufferUsage::Staging, &data.pixels)?;
        let image = Image::new(self.device.clone(), ImageKind::Texture, TEXTURE_FORMAT, extent)?;

        transfer.transition_image_layout(
            image.handle(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        transfer.copy_buffer_to_image(&staging, image.handle(), data.width, data.height)?;
        transfer.transition_image_layout(
            image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        let descriptor_set = self.pool.allocate_one(self.set_layout)?;
        write_combined_image_sampler(
            &self.device,
            descriptor_set,
            0,
            self.sampler.handle(),
            image.view(),
        );

        let handle = self.textures.insert(Texture {
            name: name.to_string(),
            image,
            descriptor_set,
        });
        debug!(
            "Texture '{}' uploaded ({}x{}) as handle {}",
            name,
            data.width,
            data.height,
            handle.index()
        );
        Ok(handle)
    }

    #[inline]
    pub fn fallback(&self) -> Option<TextureHandle> {
        self.fallback
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(handle)
    }

    /// Descriptor set for `handle`, or the fallback's if the handle is stale.
    pub fn descriptor_set(&self, handle: TextureHandle) -> Option<vk::DescriptorSet> {
        self.textures
            .get(handle)
            .or_else(|| self.fallback.and_then(|f| self.textures.get(f)))
            .map(|texture| texture.descriptor_set)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

/// One combined image sampler per texture.
pub fn sampler_pool_sizes(capacity: u32) -> [vk::DescriptorPoolSize; 1] {
    [pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, capacity)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_names_get_independent_entries() {
        let mut table = HandleTable::new();
        let a = table.insert("texture1.jpg");
        let b = table.insert("texture1.jpg");

        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(a), Some(&"texture1.jpg"));
        assert_eq!(table.get(b), Some(&"texture1.jpg"));
    }

    #[test]
    fn test_removed_handle_goes_stale() {
        let mut table = HandleTable::new();
        let old = table.insert(1);
        assert_eq!(table.remove(old), Some(1));
        assert_eq!(table.get(old), None);
        assert_eq!(table.remove(old), None);

        // The slot is reused under a new generation.
        let new = table.insert(2);
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);
        assert_eq!(table.get(old), None);
        assert_eq!(table.get(new), Some(&2));
    }

    #[test]
    fn test_first_handle_is_index_zero() {
        let mut table = HandleTable::new();
        let fallback = table.insert("fallback");
        let other = table.insert("other");
        assert_eq!(fallback.index(), 0);
        assert_eq!(other.index(), 1);
        assert_eq!(table.values().count(), 2);
    }

    #[test]
    fn test_sampler_pool_matches_capacity() {
        let sizes = sampler_pool_sizes(20);
        assert_eq!(sizes[0].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[0].descriptor_count, 20);
    }
}

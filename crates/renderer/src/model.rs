//! Models: groups of meshes sharing one world transform.

use std::sync::Arc;

use glam::Mat4;
use tracing::debug;

use subpass_resources::ImportedScene;
use subpass_rhi::RhiResult;
use subpass_rhi::device::Device;
use subpass_rhi::transfer::TransferContext;

use crate::error::{RenderError, RenderResult};
use crate::mesh::Mesh;
use crate::texture::TextureHandle;

/// Meshes imported from one file.
pub struct Model {
    meshes: Vec<Mesh>,
    transform: Mat4,
}

impl Model {
    pub fn from_meshes(meshes: Vec<Mesh>) -> Self {
        Self {
            meshes,
            transform: Mat4::IDENTITY,
        }
    }

    /// Uploads every sub-mesh of `scene`.
    ///
    /// `material_textures[i]` is the texture loaded for material `i`, or
    /// `None` if that material has none. Sub-meshes without a usable
    /// material get `fallback`. Nothing is kept if any upload fails.
    pub fn load_from(
        device: Arc<Device>,
        transfer: &TransferContext,
        scene: &ImportedScene,
        material_textures: &[Option<TextureHandle>],
        fallback: TextureHandle,
    ) -> RhiResult<Self> {
        let meshes = scene
            .meshes
            .iter()
            .map(|imported| {
                let texture =
                    resolve_texture(imported.material_id, material_textures, fallback);
                Mesh::from_imported(device.clone(), transfer, imported, texture)
            })
            .collect::<RhiResult<Vec<_>>>()?;

        debug!(
            "Model from {} uploaded: {} mesh(es)",
            scene.path.display(),
            meshes.len()
        );
        Ok(Self::from_meshes(meshes))
    }

    #[inline]
    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    #[inline]
    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Replaces the model matrix. Setting the same matrix again is a no-op.
    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }
}

/// Texture of a sub-mesh's material, or `fallback`.
pub fn resolve_texture(
    material_id: Option<usize>,
    material_textures: &[Option<TextureHandle>],
    fallback: TextureHandle,
) -> TextureHandle {
    material_id
        .and_then(|id| material_textures.get(id).copied().flatten())
        .unwrap_or(fallback)
}

/// Identifies a model owned by a [`ModelStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModelId(usize);

impl ModelId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Models in creation order. Models are never removed.
#[derive(Default)]
pub struct ModelStore {
    models: Vec<Model>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: Model) -> ModelId {
        self.models.push(model);
        ModelId(self.models.len() - 1)
    }

    pub fn get(&self, id: ModelId) -> Option<&Model> {
        self.models.get(id.0)
    }

    /// Sets the transform of model `id`.
    ///
    /// # Errors
    ///
    /// [`RenderError::UnknownModel`] if `id` was not issued by this store.
    pub fn update(&mut self, id: ModelId, transform: Mat4) -> RenderResult<()> {
        let model = self
            .models
            .get_mut(id.0)
            .ok_or(RenderError::UnknownModel(id.0))?;
        model.set_transform(transform);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.models.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::texture::HandleTable;
    use glam::Vec3;

    fn handles() -> (TextureHandle, TextureHandle, TextureHandle) {
        let mut table = HandleTable::new();
        (table.insert(()), table.insert(()), table.insert(()))
    }

    #[test]
    fn test_material_without_texture_uses_fallback() {
        let (fallback, wood, stone) = handles();
        let materials = [Some(wood), None, Some(stone)];

        assert_eq!(resolve_texture(Some(0), &materials, fallback), wood);
        assert_eq!(resolve_texture(Some(1), &materials, fallback), fallback);
        assert_eq!(resolve_texture(Some(2), &materials, fallback), stone);
        assert_eq!(resolve_texture(None, &materials, fallback), fallback);
        // Out-of-range material ids also fall back.
        assert_eq!(resolve_texture(Some(7), &materials, fallback), fallback);
    }

    #[test]
    fn test_update_model_is_idempotent() {
        let mut store = ModelStore::new();
        let id = store.insert(Model::from_meshes(Vec::new()));
        let transform = Mat4::from_rotation_y(0.5) * Mat4::from_translation(Vec3::X);

        store.update(id, transform).unwrap();
        let once = store.get(id).unwrap().transform();
        store.update(id, transform).unwrap();
        let twice = store.get(id).unwrap().transform();

        assert_eq!(once, transform);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unknown_model_is_a_usage_error() {
        let mut store = ModelStore::new();
        store.insert(Model::from_meshes(Vec::new()));

        let err = store.update(ModelId(3), Mat4::IDENTITY).unwrap_err();
        assert!(matches!(err, RenderError::UnknownModel(3)));
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_ids_follow_creation_order() {
        let mut store = ModelStore::new();
        let a = store.insert(Model::from_meshes(Vec::new()));
        let b = store.insert(Model::from_meshes(Vec::new()));
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.iter().count(), 2);
    }
}

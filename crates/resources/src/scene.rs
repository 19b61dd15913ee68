//! OBJ scene import.
//!
//! Wraps `tobj` and reduces its output to what the renderer consumes: one
//! [`ImportedMesh`] per OBJ object/group, plus a material table that only
//! records each material's diffuse texture file name.

use std::path::{Path, PathBuf};

use glam::{Vec2, Vec3};
use tracing::{debug, info, warn};

use crate::error::{ResourceError, ResourceResult};

/// Geometry of one sub-mesh with a single shared index stream.
#[derive(Debug, Clone, Default)]
pub struct ImportedMesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    /// Per-vertex colors; white when the file carries none.
    pub colors: Vec<Vec3>,
    /// Texture coordinates with V already flipped for Vulkan's top-left origin.
    pub tex_coords: Vec<Vec2>,
    pub indices: Vec<u32>,
    /// Index into [`ImportedScene::materials`].
    pub material_id: Option<usize>,
}

impl ImportedMesh {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

/// Result of importing one model file.
#[derive(Debug, Clone, Default)]
pub struct ImportedScene {
    pub path: PathBuf,
    pub meshes: Vec<ImportedMesh>,
    /// Diffuse texture file name per material, `None` for untextured materials.
    pub materials: Vec<Option<String>>,
}

impl ImportedScene {
    /// Texture file name for a mesh's material, if it has one.
    pub fn texture_of(&self, mesh: &ImportedMesh) -> Option<&str> {
        mesh.material_id
            .and_then(|id| self.materials.get(id))
            .and_then(|name| name.as_deref())
    }
}

/// Imports an OBJ file, triangulating faces and joining identical vertices.
///
/// A missing or unreadable material library is logged and treated as an
/// empty material table, so every mesh falls back to the default texture.
///
/// # Errors
///
/// - [`ResourceError::FileNotFound`] if `path` does not exist
/// - [`ResourceError::ObjLoad`] if the importer rejects the file
/// - [`ResourceError::NoMeshes`] if no sub-mesh has any triangles
pub fn import_obj(path: &Path) -> ResourceResult<ImportedScene> {
    if !path.exists() {
        return Err(ResourceError::FileNotFound(path.to_path_buf()));
    }

    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };

    let (models, materials) =
        tobj::load_obj(path, &options).map_err(|source| ResourceError::ObjLoad {
            path: path.to_path_buf(),
            source,
        })?;

    let materials = match materials {
        Ok(materials) => materials
            .iter()
            .map(|material| {
                material
                    .diffuse_texture
                    .as_deref()
                    .and_then(texture_file_name)
            })
            .collect(),
        Err(e) => {
            warn!("No materials for {}: {}", path.display(), e);
            Vec::new()
        }
    };

    let meshes: Vec<ImportedMesh> = models
        .into_iter()
        .filter_map(|model| {
            let mesh = convert_mesh(model);
            if mesh.indices.is_empty() || mesh.positions.is_empty() {
                warn!("Skipping empty sub-mesh '{}'", mesh.name);
                None
            } else {
                Some(mesh)
            }
        })
        .collect();

    if meshes.is_empty() {
        return Err(ResourceError::NoMeshes(path.to_path_buf()));
    }

    info!(
        "Imported {}: {} mesh(es), {} material(s)",
        path.display(),
        meshes.len(),
        materials.len()
    );

    Ok(ImportedScene {
        path: path.to_path_buf(),
        meshes,
        materials,
    })
}

fn convert_mesh(model: tobj::Model) -> ImportedMesh {
    let mesh = model.mesh;
    let vertex_count = mesh.positions.len() / 3;

    let positions: Vec<Vec3> = mesh
        .positions
        .chunks_exact(3)
        .map(|p| Vec3::new(p[0], p[1], p[2]))
        .collect();

    let colors = if mesh.vertex_color.len() == vertex_count * 3 {
        mesh.vertex_color
            .chunks_exact(3)
            .map(|c| Vec3::new(c[0], c[1], c[2]))
            .collect()
    } else {
        vec![Vec3::ONE; vertex_count]
    };

    let tex_coords = if mesh.texcoords.len() == vertex_count * 2 {
        mesh.texcoords
            .chunks_exact(2)
            .map(|t| Vec2::new(t[0], 1.0 - t[1]))
            .collect()
    } else {
        vec![Vec2::ZERO; vertex_count]
    };

    debug!(
        "Sub-mesh '{}': {} vertices, {} indices",
        model.name,
        vertex_count,
        mesh.indices.len()
    );

    ImportedMesh {
        name: model.name,
        positions,
        colors,
        tex_coords,
        indices: mesh.indices,
        material_id: mesh.material_id,
    }
}

/// Reduces a texture reference to its bare file name.
///
/// Exporters frequently write absolute or Windows-style paths; only the last
/// component is kept so the name can be resolved against the texture directory.
pub fn texture_file_name(reference: &str) -> Option<String> {
    reference
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_file_name_strips_directories() {
        assert_eq!(
            texture_file_name("C:\\art\\seahawk\\hull.png").as_deref(),
            Some("hull.png")
        );
        assert_eq!(
            texture_file_name("/home/me/textures/wing.jpg").as_deref(),
            Some("wing.jpg")
        );
        assert_eq!(texture_file_name("plain.png").as_deref(), Some("plain.png"));
    }

    #[test]
    fn test_texture_file_name_rejects_empty() {
        assert!(texture_file_name("").is_none());
        assert!(texture_file_name("textures/").is_none());
    }

    #[test]
    fn test_texture_of_ignores_out_of_range_material() {
        let scene = ImportedScene {
            materials: vec![Some("a.png".into()), None],
            ..Default::default()
        };
        let mut mesh = ImportedMesh {
            material_id: Some(0),
            ..Default::default()
        };
        assert_eq!(scene.texture_of(&mesh), Some("a.png"));
        mesh.material_id = Some(1);
        assert_eq!(scene.texture_of(&mesh), None);
        mesh.material_id = Some(7);
        assert_eq!(scene.texture_of(&mesh), None);
        mesh.material_id = None;
        assert_eq!(scene.texture_of(&mesh), None);
    }
}

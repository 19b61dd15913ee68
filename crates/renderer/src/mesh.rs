//! GPU-resident meshes.

use std::sync::Arc;

use ash::vk;
use glam::Mat4;

use subpass_resources::ImportedMesh;
use subpass_rhi::buffer::{Buffer, BufferUsage};
use subpass_rhi::command::CommandBuffer;
use subpass_rhi::device::Device;
use subpass_rhi::transfer::TransferContext;
use subpass_rhi::vertex::Vertex;
use subpass_rhi::{RhiError, RhiResult};

use crate::texture::TextureHandle;

/// Device-local vertex and optional index data plus per-mesh state.
///
/// Geometry is immutable once uploaded; only the transform can change.
pub struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Option<Buffer>,
    vertex_count: u32,
    index_count: u32,
    transform: Mat4,
    texture: TextureHandle,
}

impl Mesh {
    /// Uploads `vertices` (and `indices`, if any) through staging buffers.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] for an empty vertex list or an empty
    /// index list, and any error from buffer creation or the transfer.
    pub fn new(
        device: Arc<Device>,
        transfer: &TransferContext,
        vertices: &[Vertex],
        indices: Option<&[u32]>,
        texture: TextureHandle,
    ) -> RhiResult<Self> {
        if vertices.is_empty() {
            return Err(RhiError::InvalidArgument(
                "mesh must have at least one vertex".into(),
            ));
        }

        let vertex_buffer =
            Buffer::device_local_with_data(device.clone(), transfer, BufferUsage::Vertex, vertices)?;

        let index_buffer = match indices {
            Some([]) => {
                return Err(RhiError::InvalidArgument(
                    "index list given but empty".into(),
                ));
            }
            Some(indices) => Some(Buffer::device_local_with_data(
                device,
                transfer,
                BufferUsage::Index,
                indices,
            )?),
            None => None,
        };

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: indices.map_or(0, |i| i.len() as u32),
            transform: Mat4::IDENTITY,
            texture,
        })
    }

    /// Uploads an imported sub-mesh.
    pub fn from_imported(
        device: Arc<Device>,
        transfer: &TransferContext,
        imported: &ImportedMesh,
        texture: TextureHandle,
    ) -> RhiResult<Self> {
        let vertices = imported_vertices(imported);
        Self::new(
            device,
            transfer,
            &vertices,
            Some(imported.indices.as_slice()),
            texture,
        )
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    #[inline]
    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }

    #[inline]
    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    #[inline]
    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    /// Binds the geometry and issues the draw.
    pub fn record_draw(&self, cmd: &CommandBuffer) {
        cmd.bind_vertex_buffers(0, &[self.vertex_buffer.handle()], &[0]);
        match &self.index_buffer {
            Some(index_buffer) => {
                cmd.bind_index_buffer(index_buffer.handle(), 0, vk::IndexType::UINT32);
                cmd.draw_indexed(self.index_count, 1, 0, 0, 0);
            }
            None => cmd.draw(self.vertex_count, 1, 0, 0),
        }
    }
}

/// Interleaves an imported mesh's attribute arrays into [`Vertex`] records.
pub fn imported_vertices(mesh: &ImportedMesh) -> Vec<Vertex> {
    mesh.positions
        .iter()
        .zip(&mesh.colors)
        .zip(&mesh.tex_coords)
        .map(|((&position, &color), &tex_coord)| Vertex::new(position, color, tex_coord))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};

    #[test]
    fn test_imported_vertices_interleave_attributes() {
        let mesh = ImportedMesh {
            positions: vec![Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)],
            colors: vec![Vec3::ONE, Vec3::ZERO],
            tex_coords: vec![Vec2::new(0.0, 1.0), Vec2::new(1.0, 0.0)],
            indices: vec![0, 1, 0],
            ..Default::default()
        };

        let vertices = imported_vertices(&mesh);
        assert_eq!(vertices.len(), 2);
        assert_eq!(vertices[1].position, Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(vertices[1].color, Vec3::ZERO);
        assert_eq!(vertices[0].tex_coord, Vec2::new(0.0, 1.0));
    }

    #[test]
    fn test_empty_import_yields_no_vertices() {
        assert!(imported_vertices(&ImportedMesh::default()).is_empty());
    }
}

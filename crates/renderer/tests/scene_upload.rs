//! Mesh, texture and model uploads on a headless device.
//!
//! These need a Vulkan loader and a device with a graphics queue. Without
//! them they print a note and return.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3};
use subpass_resources::{ImportedMesh, ImportedScene};
use subpass_renderer::descriptors::DescriptorLayouts;
use subpass_renderer::mesh::Mesh;
use subpass_renderer::model::Model;
use subpass_renderer::texture::{HandleTable, TextureStore};
use subpass_rhi::buffer::{Buffer, BufferUsage};
use subpass_rhi::device::Device;
use subpass_rhi::instance::Instance;
use subpass_rhi::physical_device::select_physical_device;
use subpass_rhi::transfer::TransferContext;
use subpass_rhi::vertex::Vertex;
use subpass_rhi::RhiError;
use tempfile::TempDir;

struct Gpu {
    // Field order matters: the device must drop before the instance.
    transfer: TransferContext,
    device: Arc<Device>,
    _instance: Instance,
}

fn headless_gpu() -> Option<Gpu> {
    let instance = match Instance::new(c"subpass-renderer-tests", false, &[]) {
        Ok(instance) => instance,
        Err(RhiError::LoadingError(_)) => {
            eprintln!("Skipping test: Vulkan not available");
            return None;
        }
        Err(e) => panic!("Unexpected error: {:?}", e),
    };

    let physical = match select_physical_device(instance.handle(), None) {
        Ok(physical) => physical,
        Err(RhiError::NoSuitableGpu) => {
            eprintln!("Skipping test: no Vulkan device");
            return None;
        }
        Err(e) => panic!("Unexpected error: {:?}", e),
    };

    let device = Device::new(&instance, &physical).expect("device creation");
    let transfer = TransferContext::new(device.clone()).expect("transfer context");

    Some(Gpu {
        transfer,
        device,
        _instance: instance,
    })
}

fn write_png(dir: &Path, name: &str, rgba: [u8; 4]) -> PathBuf {
    let path = dir.join(name);
    image::RgbaImage::from_pixel(2, 2, image::Rgba(rgba))
        .save(&path)
        .expect("write png");
    path
}

fn triangle() -> Vec<Vertex> {
    vec![
        Vertex::new(Vec3::new(-0.4, 0.4, 0.0), Vec3::X, Vec2::new(0.0, 1.0)),
        Vertex::new(Vec3::new(0.4, 0.4, 0.0), Vec3::Y, Vec2::new(1.0, 0.0)),
        Vertex::new(Vec3::new(0.0, -0.4, 0.0), Vec3::Z, Vec2::ZERO),
    ]
}

fn any_texture() -> subpass_renderer::texture::TextureHandle {
    HandleTable::new().insert(())
}

#[test]
fn test_mesh_vertices_reach_device_memory() {
    let Some(gpu) = headless_gpu() else {
        return;
    };

    let vertices = triangle();
    let mesh = Mesh::new(
        gpu.device.clone(),
        &gpu.transfer,
        &vertices,
        Some(&[0u32, 1, 2][..]),
        any_texture(),
    )
    .expect("mesh");
    assert_eq!(mesh.vertex_count(), 3);
    assert_eq!(mesh.index_count(), 3);
    assert_eq!(mesh.transform(), Mat4::IDENTITY);

    let source = mesh.vertex_buffer();
    let readback = Buffer::with_usage(gpu.device.clone(), BufferUsage::Readback, source.size())
        .expect("readback buffer");
    gpu.transfer
        .copy_buffer(source, &readback, source.size())
        .expect("copy back");
    assert_eq!(readback.read::<Vertex>(3).expect("read"), vertices);
}

#[test]
fn test_empty_meshes_are_rejected() {
    let Some(gpu) = headless_gpu() else {
        return;
    };

    let no_vertices = Mesh::new(gpu.device.clone(), &gpu.transfer, &[], None, any_texture());
    assert!(matches!(no_vertices, Err(RhiError::InvalidArgument(_))));

    let no_indices = Mesh::new(
        gpu.device.clone(),
        &gpu.transfer,
        &triangle(),
        Some(&[][..]),
        any_texture(),
    );
    assert!(matches!(no_indices, Err(RhiError::InvalidArgument(_))));
}

#[test]
fn test_same_texture_name_loads_twice() {
    let Some(gpu) = headless_gpu() else {
        return;
    };
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "texture1.png", [255, 0, 0, 255]);

    let layouts = DescriptorLayouts::new(gpu.device.clone()).expect("layouts");
    let mut store =
        TextureStore::new(gpu.device.clone(), layouts.sampler.handle(), 4, dir.path())
            .expect("store");

    let fallback = store
        .load_fallback(&gpu.transfer, "texture1.png")
        .expect("fallback");
    let again = store.load(&gpu.transfer, "texture1.png").expect("second load");

    assert_ne!(fallback, again);
    assert_eq!(fallback.index(), 0);
    assert_eq!(store.len(), 2);
    assert_eq!(store.fallback(), Some(fallback));
    assert_ne!(store.descriptor_set(fallback), store.descriptor_set(again));
    assert_eq!(store.get(again).map(|t| t.name.as_str()), Some("texture1.png"));

    assert!(store.load(&gpu.transfer, "missing.png").is_err());
    assert_eq!(store.len(), 2);
}

#[test]
fn test_model_meshes_resolve_material_textures() {
    let Some(gpu) = headless_gpu() else {
        return;
    };
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "plain.png", [255, 255, 255, 255]);
    write_png(dir.path(), "wood.png", [120, 80, 40, 255]);

    let layouts = DescriptorLayouts::new(gpu.device.clone()).expect("layouts");
    let mut store =
        TextureStore::new(gpu.device.clone(), layouts.sampler.handle(), 4, dir.path())
            .expect("store");
    let fallback = store.load_fallback(&gpu.transfer, "plain.png").unwrap();
    let wood = store.load(&gpu.transfer, "wood.png").unwrap();

    let quad = ImportedMesh {
        name: "quad".into(),
        positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(1.0, 1.0, 0.0)],
        colors: vec![Vec3::ONE; 4],
        tex_coords: vec![Vec2::ZERO, Vec2::X, Vec2::Y, Vec2::ONE],
        indices: vec![0, 1, 2, 2, 1, 3],
        material_id: Some(0),
    };
    let untextured = ImportedMesh {
        name: "tri".into(),
        material_id: Some(1),
        indices: vec![0, 1, 2],
        positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
        colors: vec![Vec3::ONE; 3],
        tex_coords: vec![Vec2::ZERO; 3],
    };
    let scene = ImportedScene {
        path: PathBuf::from("memory.obj"),
        meshes: vec![quad, untextured],
        materials: vec![Some("wood.png".into()), None],
    };

    let model = Model::load_from(
        gpu.device.clone(),
        &gpu.transfer,
        &scene,
        &[Some(wood), None],
        fallback,
    )
    .expect("model");

    let meshes = model.meshes();
    assert_eq!(meshes.len(), 2);
    assert_eq!(meshes[0].texture(), wood);
    assert_eq!(meshes[0].index_count(), 6);
    assert_eq!(meshes[1].texture(), fallback);
    assert_eq!(meshes[1].vertex_count(), 3);
}

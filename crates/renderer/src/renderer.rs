//! Renderer orchestration.
//!
//! [`Renderer`] owns every Vulkan object the frame loop touches. Fields are
//! declared in teardown order: scene resources first, then per-image
//! resources, then the swapchain, device, surface and instance. `Drop` waits
//! for the device to go idle before any of them is released.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use glam::Mat4;
use tracing::{debug, error, info, warn};

use subpass_core::{CameraConfig, Config};
use subpass_platform::{Surface, Window, get_required_extensions};
use subpass_resources::import_obj;
use subpass_rhi::command::{CommandBuffer, CommandPool};
use subpass_rhi::device::Device;
use subpass_rhi::instance::Instance;
use subpass_rhi::physical_device::{SurfaceTarget, select_physical_device};
use subpass_rhi::render_pass::{Framebuffer, RenderPass, RenderPassLayout};
use subpass_rhi::swapchain::Swapchain;
use subpass_rhi::sync::FrameSync;
use subpass_rhi::transfer::TransferContext;
use subpass_rhi::{RhiError, RhiResult};

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::attachments::{AttachmentArena, AttachmentFormats};
use crate::descriptors::{DescriptorLayouts, FrameDescriptors};
use crate::error::{RenderError, RenderResult};
use crate::frame::FrameRing;
use crate::model::{Model, ModelId, ModelStore};
use crate::pipelines::Pipelines;
use crate::texture::{TextureHandle, TextureStore};
use crate::ubo::{PushModel, ViewProjection};

/// Application name reported to the driver.
const APP_NAME: &std::ffi::CStr = c"subpass";

/// Two-subpass deferred-composite renderer.
pub struct Renderer {
    models: ModelStore,
    textures: TextureStore,
    fallback_texture: TextureHandle,

    frame_descriptors: FrameDescriptors,
    pipelines: Pipelines,
    // Referenced by raw handle from the pipelines and the texture store.
    _layouts: DescriptorLayouts,
    framebuffers: Vec<Framebuffer>,
    render_pass: RenderPass,
    attachments: AttachmentArena,

    /// Indexed by swapchain image.
    command_buffers: Vec<CommandBuffer>,
    command_pool: CommandPool,
    /// Indexed by in-flight slot.
    frame_sync: Vec<FrameSync>,
    ring: FrameRing,
    transfer: TransferContext,

    view_projection: ViewProjection,
    texture_dir: PathBuf,

    swapchain: Swapchain,
    device: Arc<Device>,
    _surface: Surface,
    _instance: Instance,
}

impl Renderer {
    /// Brings up the device, swapchain, render pass, pipelines and per-image
    /// resources for `window`, and loads the fallback texture.
    ///
    /// # Errors
    ///
    /// Any failure aborts initialization; objects created so far are
    /// released before the error is returned.
    pub fn init(window: &Window, config: &Config) -> RenderResult<Self> {
        let renderer_config = &config.renderer;
        let (width, height) = window.framebuffer_size();
        info!("Initializing renderer ({}x{})", width, height);

        let extensions = get_required_extensions(window.raw_display_handle()?)?;
        let instance = Instance::new(APP_NAME, renderer_config.enable_validation, &extensions)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical = select_physical_device(
            instance.handle(),
            Some(SurfaceTarget {
                loader: surface.loader(),
                surface: surface.handle(),
            }),
        )?;
        let device = Device::new(&instance, &physical)?;
        let swapchain = Swapchain::new(&instance, device.clone(), surface.handle(), width, height)?;
        let extent = swapchain.extent();
        let image_count = swapchain.image_count() as usize;

        let formats = AttachmentFormats::choose(&device)?;
        let render_pass = RenderPass::new(
            device.clone(),
            &RenderPassLayout::deferred_composite(swapchain.format(), formats.color, formats.depth),
        )?;
        let attachments = AttachmentArena::new(device.clone(), formats, extent, image_count)?;
        let framebuffers = swapchain
            .image_views()
            .iter()
            .zip(attachments.iter())
            .map(|(&swapchain_view, target)| {
                Framebuffer::new(
                    device.clone(),
                    &render_pass,
                    &target.framebuffer_views(swapchain_view),
                    extent,
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let graphics_family = device
            .queue_families()
            .graphics_family
            .ok_or(RenderError::Capability(RhiError::NoSuitableGpu))?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;
        let command_buffers = command_pool.allocate(image_count as u32)?;
        let transfer = TransferContext::new(device.clone())?;

        let layouts = DescriptorLayouts::new(device.clone())?;
        let pipelines = Pipelines::new(
            device.clone(),
            &render_pass,
            &layouts,
            &renderer_config.shader_dir,
        )?;
        let frame_descriptors = FrameDescriptors::new(device.clone(), &layouts, &attachments)?;

        let mut textures = TextureStore::new(
            device.clone(),
            layouts.sampler.handle(),
            renderer_config.max_textures,
            &renderer_config.texture_dir,
        )?;
        let fallback_texture = textures.load_fallback(&transfer, &renderer_config.default_texture)?;

        let frame_sync = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::new(device.clone()))
            .collect::<RhiResult<Vec<_>>>()?;

        let view_projection = ViewProjection::new(&config.camera, aspect_ratio(extent));

        info!(
            "Renderer initialized: {} swapchain image(s), {} frame(s) in flight",
            image_count, MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            models: ModelStore::new(),
            textures,
            fallback_texture,
            frame_descriptors,
            pipelines,
            _layouts: layouts,
            framebuffers,
            render_pass,
            attachments,
            command_buffers,
            command_pool,
            frame_sync,
            ring: FrameRing::new(),
            transfer,
            view_projection,
            texture_dir: renderer_config.texture_dir.clone(),
            swapchain,
            device,
            _surface: surface,
            _instance: instance,
        })
    }

    /// Imports an OBJ file, loads its material textures and uploads its meshes.
    ///
    /// Each textured material loads its own texture, even when another model
    /// already uses the same file.
    pub fn create_model(&mut self, path: &Path) -> RenderResult<ModelId> {
        let scene = import_obj(path)?;

        let mut material_textures = Vec::with_capacity(scene.materials.len());
        for texture_name in &scene.materials {
            let handle = match texture_name {
                Some(name) => Some(self.textures.load(&self.transfer, name)?),
                None => None,
            };
            material_textures.push(handle);
        }

        let model = Model::load_from(
            self.device.clone(),
            &self.transfer,
            &scene,
            &material_textures,
            self.fallback_texture,
        )?;
        let mesh_count = model.meshes().len();
        let id = self.models.insert(model);

        info!(
            "Model {} created from {}: {} mesh(es), {} texture(s) from {}",
            id.index(),
            path.display(),
            mesh_count,
            material_textures.iter().flatten().count(),
            self.texture_dir.display()
        );
        Ok(id)
    }

    /// Sets the world transform of model `id`.
    pub fn update_model(&mut self, id: ModelId, transform: Mat4) -> RenderResult<()> {
        self.models.update(id, transform)
    }

    /// Renders and presents one frame.
    ///
    /// Blocks only on the fence of the current in-flight slot. Any acquire,
    /// submit or present failure is returned as [`RenderError::Frame`] and
    /// leaves the renderer unusable.
    pub fn draw_frame(&mut self) -> RenderResult<()> {
        let slot = self.ring.current();
        let sync = &self.frame_sync[slot];

        self.ring.ready_to_wait()?;
        sync.in_flight().wait(u64::MAX).map_err(RenderError::Frame)?;
        self.ring.fence_signaled()?;
        sync.in_flight().reset().map_err(RenderError::Frame)?;
        self.ring.begin_acquire()?;

        let (image_index, suboptimal) = self
            .swapchain
            .acquire_next_image(sync.image_available().handle())
            .map_err(RenderError::Frame)?;
        if suboptimal {
            warn!("Swapchain is suboptimal for the surface");
        }
        self.ring.begin_recording()?;

        let image = image_index as usize;
        self.record_commands(image).map_err(RenderError::Frame)?;
        self.frame_descriptors
            .update_uniform(image, &self.view_projection)
            .map_err(RenderError::Frame)?;

        let wait_semaphores = [sync.image_available().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished().handle()];
        let command_buffers = [self.command_buffers[image].handle()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .handle()
                .queue_submit(
                    self.device.graphics_queue(),
                    &[submit_info],
                    sync.in_flight().handle(),
                )
                .map_err(|e| RenderError::Frame(e.into()))?;
        }
        self.ring.mark_submitted()?;

        let suboptimal = self
            .swapchain
            .present(
                self.device.present_queue(),
                image_index,
                sync.render_finished().handle(),
            )
            .map_err(RenderError::Frame)?;
        if suboptimal {
            warn!("Present reported a suboptimal swapchain");
        }

        self.ring.advance();
        Ok(())
    }

    /// Re-records the command buffer of swapchain image `image`.
    fn record_commands(&self, image: usize) -> RhiResult<()> {
        let cmd = self
            .command_buffers
            .get(image)
            .ok_or_else(|| missing_image_resource("command buffer", image))?;
        let framebuffer = self
            .framebuffers
            .get(image)
            .ok_or_else(|| missing_image_resource("framebuffer", image))?;
        let uniform_set = self
            .frame_descriptors
            .uniform_set(image)
            .ok_or_else(|| missing_image_resource("uniform set", image))?;
        let input_set = self
            .frame_descriptors
            .input_set(image)
            .ok_or_else(|| missing_image_resource("input set", image))?;

        let extent = self.swapchain.extent();
        let viewport = full_viewport(extent);
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let graphics = vk::PipelineBindPoint::GRAPHICS;

        cmd.begin_simultaneous()?;
        cmd.begin_render_pass(
            self.render_pass.handle(),
            framebuffer.handle(),
            extent,
            self.render_pass.clear_values(),
        );

        // Geometry subpass: scene into the intermediate color and depth.
        let geometry_layout = self.pipelines.geometry_layout.handle();
        cmd.bind_pipeline(graphics, self.pipelines.geometry.handle());
        cmd.set_viewport(&viewport);
        cmd.set_scissor(&scissor);

        for model in self.models.iter() {
            for mesh in model.meshes() {
                let push = PushModel {
                    model: model.transform() * mesh.transform(),
                };
                cmd.push_constants(geometry_layout, vk::ShaderStageFlags::VERTEX, 0, &push);

                let Some(texture_set) = self.textures.descriptor_set(mesh.texture()) else {
                    warn!("No texture set for mesh, skipping draw");
                    continue;
                };
                cmd.bind_descriptor_sets(graphics, geometry_layout, 0, &[uniform_set, texture_set]);
                mesh.record_draw(cmd);
            }
        }

        // Composite subpass: full-screen triangle reading the inputs.
        cmd.next_subpass();
        cmd.bind_pipeline(graphics, self.pipelines.composite.handle());
        cmd.set_viewport(&viewport);
        cmd.set_scissor(&scissor);
        cmd.bind_descriptor_sets(
            graphics,
            self.pipelines.composite_layout.handle(),
            0,
            &[input_set],
        );
        cmd.draw(3, 1, 0, 0);

        cmd.end_render_pass();
        cmd.end()
    }

    /// Waits for the GPU to finish and releases everything.
    pub fn shutdown(self) -> RenderResult<()> {
        self.device.wait_idle().map_err(RenderError::Frame)?;
        info!(
            "Shutting down renderer: {} model(s), {} texture(s)",
            self.models.len(),
            self.textures.len()
        );
        Ok(())
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Formats of the intermediate color and depth attachments.
    #[inline]
    pub fn attachment_formats(&self) -> AttachmentFormats {
        self.attachments.formats()
    }

    #[inline]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    #[inline]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Recomputes the view/projection uniform from `camera`.
    pub fn set_camera(&mut self, camera: &CameraConfig) {
        self.view_projection = ViewProjection::new(camera, aspect_ratio(self.swapchain.extent()));
        debug!("Camera updated");
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during renderer drop: {}", e);
        }
        self.command_pool.free(&self.command_buffers);
        info!("Renderer destroyed");
    }
}

fn aspect_ratio(extent: vk::Extent2D) -> f32 {
    extent.width as f32 / extent.height.max(1) as f32
}

fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn missing_image_resource(what: &str, image: usize) -> RhiError {
    RhiError::InvalidArgument(format!("no {} for swapchain image {}", what, image))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_covers_extent() {
        let viewport = full_viewport(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert_eq!(viewport.width, 800.0);
        assert_eq!(viewport.height, 600.0);
        assert_eq!(viewport.min_depth, 0.0);
        assert_eq!(viewport.max_depth, 1.0);
    }

    #[test]
    fn test_aspect_ratio_survives_zero_height() {
        let aspect = aspect_ratio(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert!((aspect - 4.0 / 3.0).abs() < 1e-6);
        assert!(aspect_ratio(vk::Extent2D { width: 10, height: 0 }).is_finite());
    }
}

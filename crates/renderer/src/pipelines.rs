//! The geometry and composite pipelines.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::info;

use subpass_rhi::RhiResult;
use subpass_rhi::device::Device;
use subpass_rhi::pipeline::{
    ColorBlendAttachment, CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline, PipelineLayout,
};
use subpass_rhi::render_pass::{COMPOSITE_SUBPASS, GEOMETRY_SUBPASS, RenderPass};
use subpass_rhi::shader::{Shader, ShaderStage};
use subpass_rhi::vertex::Vertex;

use crate::descriptors::DescriptorLayouts;
use crate::ubo::PushModel;

/// SPIR-V blob names under the shader directory.
pub const GEOMETRY_VERTEX_SHADER: &str = "vert";
pub const GEOMETRY_FRAGMENT_SHADER: &str = "frag";
pub const COMPOSITE_VERTEX_SHADER: &str = "second_vert";
pub const COMPOSITE_FRAGMENT_SHADER: &str = "second_frag";

/// The model matrix, read by the vertex stage only.
pub fn model_push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .offset(0)
        .size(PushModel::SIZE)
}

/// Both pipelines with their layouts.
pub struct Pipelines {
    pub geometry: Pipeline,
    pub geometry_layout: PipelineLayout,
    pub composite: Pipeline,
    pub composite_layout: PipelineLayout,
}

impl Pipelines {
    /// Builds both pipelines from `<shader_dir>/<name>.spv`.
    ///
    /// Shader modules are only needed during creation and are dropped before
    /// return.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        layouts: &DescriptorLayouts,
        shader_dir: &Path,
    ) -> RhiResult<Self> {
        let geometry_layout = PipelineLayout::new(
            device.clone(),
            &[layouts.uniform.handle(), layouts.sampler.handle()],
            &[model_push_constant_range()],
        )?;

        let vertex = Shader::load(
            device.clone(),
            shader_dir,
            GEOMETRY_VERTEX_SHADER,
            ShaderStage::Vertex,
        )?;
        let fragment = Shader::load(
            device.clone(),
            shader_dir,
            GEOMETRY_FRAGMENT_SHADER,
            ShaderStage::Fragment,
        )?;

        let geometry = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex)
            .fragment_shader(&fragment)
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&Vertex::attribute_descriptions())
            .cull_mode(CullMode::Back)
            .front_face(FrontFace::CounterClockwise)
            .color_blend_attachment(ColorBlendAttachment::alpha_blend())
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .render_pass(render_pass.handle(), GEOMETRY_SUBPASS)
            .build(device.clone(), &geometry_layout)?;

        let composite_layout =
            PipelineLayout::new(device.clone(), &[layouts.input.handle()], &[])?;

        let second_vertex = Shader::load(
            device.clone(),
            shader_dir,
            COMPOSITE_VERTEX_SHADER,
            ShaderStage::Vertex,
        )?;
        let second_fragment = Shader::load(
            device.clone(),
            shader_dir,
            COMPOSITE_FRAGMENT_SHADER,
            ShaderStage::Fragment,
        )?;

        // Full-screen triangle generated from gl_VertexIndex; no vertex input.
        let composite = GraphicsPipelineBuilder::new()
            .vertex_shader(&second_vertex)
            .fragment_shader(&second_fragment)
            .cull_mode(CullMode::Back)
            .front_face(FrontFace::CounterClockwise)
            .color_blend_attachment(ColorBlendAttachment::alpha_blend())
            .depth_test_enable(true)
            .depth_write_enable(false)
            .depth_compare_op(vk::CompareOp::LESS)
            .render_pass(render_pass.handle(), COMPOSITE_SUBPASS)
            .build(device, &composite_layout)?;

        info!("Geometry and composite pipelines created");

        Ok(Self {
            geometry,
            geometry_layout,
            composite,
            composite_layout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constant_holds_one_matrix() {
        let range = model_push_constant_range();
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 64);
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX);
    }
}

//! Render pass description, validation and creation.
//!
//! A [`RenderPassLayout`] is a plain description of attachments, subpasses
//! and dependencies. It can be inspected and validated without a device,
//! which is how the layout chain of every attachment is checked in tests;
//! [`RenderPass::new`] turns a validated layout into a `VkRenderPass`.
//!
//! # Deferred composite layout
//!
//! [`RenderPassLayout::deferred_composite`] builds the two-subpass pass the
//! renderer uses:
//!
//! | index | attachment           | subpass 0             | subpass 1            |
//! |-------|----------------------|-----------------------|----------------------|
//! | 0     | swapchain color      |                       | color output         |
//! | 1     | intermediate color   | color output          | input attachment     |
//! | 2     | depth                | depth/stencil         | input attachment     |

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Attachment index of the swapchain image in the deferred layout.
pub const SWAPCHAIN_ATTACHMENT: u32 = 0;
/// Attachment index of the intermediate color target.
pub const COLOR_ATTACHMENT: u32 = 1;
/// Attachment index of the depth target.
pub const DEPTH_ATTACHMENT: u32 = 2;

/// Subpass rendering opaque geometry into the intermediates.
pub const GEOMETRY_SUBPASS: u32 = 0;
/// Subpass compositing the intermediates into the swapchain image.
pub const COMPOSITE_SUBPASS: u32 = 1;

/// One attachment slot of a render pass.
#[derive(Clone, Copy)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    /// Clear value used when `load_op` is `CLEAR`.
    pub clear_value: vk::ClearValue,
}

// `vk::ClearValue` is a union, so the clear value is left out.
impl std::fmt::Debug for AttachmentDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentDesc")
            .field("format", &self.format)
            .field("load_op", &self.load_op)
            .field("store_op", &self.store_op)
            .field("initial_layout", &self.initial_layout)
            .field("final_layout", &self.final_layout)
            .finish_non_exhaustive()
    }
}

impl AttachmentDesc {
    fn to_vk(self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(self.initial_layout)
            .final_layout(self.final_layout)
    }
}

/// Attachment usage of one subpass.
#[derive(Clone, Debug, Default)]
pub struct SubpassDesc {
    pub color: Vec<vk::AttachmentReference>,
    pub depth: Option<vk::AttachmentReference>,
    pub input: Vec<vk::AttachmentReference>,
}

impl SubpassDesc {
    /// Layout this subpass needs `attachment` in, if it uses it.
    pub fn layout_of(&self, attachment: u32) -> Option<vk::ImageLayout> {
        self.color
            .iter()
            .chain(self.depth.iter())
            .chain(self.input.iter())
            .find(|r| r.attachment == attachment)
            .map(|r| r.layout)
    }

    /// Whether the subpass writes `attachment` as a color or depth target.
    pub fn writes(&self, attachment: u32) -> bool {
        self.color
            .iter()
            .chain(self.depth.iter())
            .any(|r| r.attachment == attachment)
    }

    /// Whether `attachment` is this subpass's depth/stencil target.
    pub fn uses_as_depth(&self, attachment: u32) -> bool {
        self.depth.is_some_and(|r| r.attachment == attachment)
    }

    /// Whether the subpass reads `attachment` as an input attachment.
    pub fn reads(&self, attachment: u32) -> bool {
        self.input.iter().any(|r| r.attachment == attachment)
    }
}

/// Full description of a render pass.
#[derive(Clone, Debug, Default)]
pub struct RenderPassLayout {
    pub attachments: Vec<AttachmentDesc>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassLayout {
    /// Geometry into intermediates, then composite into the swapchain image.
    pub fn deferred_composite(
        swapchain_format: vk::Format,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Self {
        let attachments = vec![
            AttachmentDesc {
                format: swapchain_format,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [0.0, 0.0, 0.0, 0.0],
                    },
                },
            },
            AttachmentDesc {
                format: color_format,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [0.6, 0.65, 0.4, 1.0],
                    },
                },
            },
            AttachmentDesc {
                format: depth_format,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                clear_value: vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            },
        ];

        let geometry = SubpassDesc {
            color: vec![vk::AttachmentReference {
                attachment: COLOR_ATTACHMENT,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            }],
            depth: Some(vk::AttachmentReference {
                attachment: DEPTH_ATTACHMENT,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }),
            input: Vec::new(),
        };

        let composite = SubpassDesc {
            color: vec![vk::AttachmentReference {
                attachment: SWAPCHAIN_ATTACHMENT,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            }],
            depth: None,
            input: vec![
                vk::AttachmentReference {
                    attachment: COLOR_ATTACHMENT,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
                vk::AttachmentReference {
                    attachment: DEPTH_ATTACHMENT,
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            ],
        };

        let dependencies = vec![
            // Earlier reads and writes of the targets finish before the color
            // and depth clears.
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: GEOMETRY_SUBPASS,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::FRAGMENT_SHADER,
                dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dependency_flags: vk::DependencyFlags::empty(),
            },
            // Geometry output is visible to the composite fragment shader.
            vk::SubpassDependency {
                src_subpass: GEOMETRY_SUBPASS,
                dst_subpass: COMPOSITE_SUBPASS,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::SHADER_READ
                    | vk::AccessFlags::INPUT_ATTACHMENT_READ,
                dependency_flags: vk::DependencyFlags::empty(),
            },
            // Composite output lands before presentation reads it.
            vk::SubpassDependency {
                src_subpass: COMPOSITE_SUBPASS,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                dst_access_mask: vk::AccessFlags::MEMORY_READ,
                dependency_flags: vk::DependencyFlags::empty(),
            },
        ];

        Self {
            attachments,
            subpasses: vec![geometry, composite],
            dependencies,
        }
    }

    /// Clear values in attachment order, for `vkCmdBeginRenderPass`.
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        self.attachments.iter().map(|a| a.clear_value).collect()
    }

    /// Layouts `attachment` passes through: initial, each distinct per-subpass
    /// layout in execution order, then final.
    pub fn layout_chain(&self, attachment: u32) -> Vec<vk::ImageLayout> {
        let Some(desc) = self.attachments.get(attachment as usize) else {
            return Vec::new();
        };

        let mut chain = vec![desc.initial_layout];
        let used = self
            .subpasses
            .iter()
            .filter_map(|s| s.layout_of(attachment))
            .chain(std::iter::once(desc.final_layout));
        for layout in used {
            if chain.last() != Some(&layout) {
                chain.push(layout);
            }
        }
        chain
    }

    /// Checks references and the dependencies the layout transitions rely on.
    ///
    /// # Errors
    ///
    /// [`RhiError::RenderPassError`] when:
    /// - a reference or dependency points outside the pass
    /// - an attachment written in one subpass and read as input in a later
    ///   one has no dependency from the writer to the reader's fragment stage
    /// - an attachment starting `UNDEFINED` has no external dependency into
    ///   its first subpass or an earlier one; a depth target needs one into
    ///   its first subpass reaching the fragment-test stages
    /// - an attachment ending in `PRESENT_SRC_KHR` has no external dependency
    ///   out of its last subpass
    pub fn validate(&self) -> RhiResult<()> {
        let attachment_count = self.attachments.len() as u32;
        let subpass_count = self.subpasses.len() as u32;

        for (i, subpass) in self.subpasses.iter().enumerate() {
            let refs = subpass
                .color
                .iter()
                .chain(subpass.depth.iter())
                .chain(subpass.input.iter());
            for r in refs {
                if r.attachment >= attachment_count {
                    return Err(RhiError::RenderPassError(format!(
                        "subpass {} references attachment {} of {}",
                        i, r.attachment, attachment_count
                    )));
                }
            }
        }

        let in_range = |s: u32| s == vk::SUBPASS_EXTERNAL || s < subpass_count;
        for dep in &self.dependencies {
            if !in_range(dep.src_subpass) || !in_range(dep.dst_subpass) {
                return Err(RhiError::RenderPassError(format!(
                    "dependency {} -> {} is outside {} subpasses",
                    dep.src_subpass, dep.dst_subpass, subpass_count
                )));
            }
        }

        for attachment in 0..attachment_count {
            self.validate_attachment(attachment)?;
        }

        Ok(())
    }

    fn validate_attachment(&self, attachment: u32) -> RhiResult<()> {
        let users: Vec<u32> = (0..self.subpasses.len() as u32)
            .filter(|&s| self.subpasses[s as usize].layout_of(attachment).is_some())
            .collect();
        let (Some(&first), Some(&last)) = (users.first(), users.last()) else {
            return Ok(());
        };
        let desc = &self.attachments[attachment as usize];

        if desc.initial_layout == vk::ImageLayout::UNDEFINED {
            let entered = if self.subpasses[first as usize].uses_as_depth(attachment) {
                // Depth is transitioned and cleared in the fragment-test stages.
                self.has_dependency(vk::SUBPASS_EXTERNAL, first, |dep| {
                    dep.dst_stage_mask.intersects(
                        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                    ) && dep
                        .dst_access_mask
                        .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
                })
            } else {
                // An earlier entry point reaches `first` through the subpass chain.
                self.dependencies
                    .iter()
                    .any(|d| d.src_subpass == vk::SUBPASS_EXTERNAL && d.dst_subpass <= first)
            };
            if !entered {
                return Err(RhiError::RenderPassError(format!(
                    "attachment {} has no external dependency ordering its first use in subpass {}",
                    attachment, first
                )));
            }
        }

        for (i, &writer) in users.iter().enumerate() {
            if !self.subpasses[writer as usize].writes(attachment) {
                continue;
            }
            for &reader in &users[i + 1..] {
                if !self.subpasses[reader as usize].reads(attachment) {
                    continue;
                }
                let ok = self.has_dependency(writer, reader, |dep| {
                    dep.dst_stage_mask
                        .contains(vk::PipelineStageFlags::FRAGMENT_SHADER)
                        && dep.src_stage_mask.intersects(
                            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                        )
                });
                if !ok {
                    return Err(RhiError::RenderPassError(format!(
                        "attachment {} written in subpass {} and read in subpass {} without a dependency",
                        attachment, writer, reader
                    )));
                }
            }
        }

        if desc.final_layout == vk::ImageLayout::PRESENT_SRC_KHR
            && !self.has_dependency(last, vk::SUBPASS_EXTERNAL, |_| true)
        {
            return Err(RhiError::RenderPassError(format!(
                "presented attachment {} has no dependency out of subpass {}",
                attachment, last
            )));
        }

        Ok(())
    }

    fn has_dependency(
        &self,
        src: u32,
        dst: u32,
        predicate: impl Fn(&vk::SubpassDependency) -> bool,
    ) -> bool {
        self.dependencies
            .iter()
            .any(|d| d.src_subpass == src && d.dst_subpass == dst && predicate(d))
    }
}

/// Vulkan render pass wrapper.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    clear_values: Vec<vk::ClearValue>,
}

impl RenderPass {
    /// Validates `layout` and creates the render pass.
    pub fn new(device: Arc<Device>, layout: &RenderPassLayout) -> RhiResult<Self> {
        layout.validate()?;

        let attachments: Vec<vk::AttachmentDescription> =
            layout.attachments.iter().map(|a| a.to_vk()).collect();

        let subpasses: Vec<vk::SubpassDescription<'_>> = layout
            .subpasses
            .iter()
            .map(|s| {
                let desc = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&s.color)
                    .input_attachments(&s.input);
                match &s.depth {
                    Some(depth) => desc.depth_stencil_attachment(depth),
                    None => desc,
                }
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&layout.dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };
        debug!(
            "Render pass created: {} attachments, {} subpasses, {} dependencies",
            attachments.len(),
            subpasses.len(),
            layout.dependencies.len()
        );

        Ok(Self {
            device,
            render_pass,
            clear_values: layout.clear_values(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn clear_values(&self) -> &[vk::ClearValue] {
        &self.clear_values
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Vulkan framebuffer wrapper.
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// `views` must be in the render pass's attachment order.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };
        Ok(Self {
            device,
            framebuffer,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deferred() -> RenderPassLayout {
        RenderPassLayout::deferred_composite(
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::R8G8B8A8_UNORM,
            vk::Format::D32_SFLOAT,
        )
    }

    #[test]
    fn test_deferred_layout_is_valid() {
        deferred().validate().unwrap();
    }

    #[test]
    fn test_intermediate_color_chain() {
        assert_eq!(
            deferred().layout_chain(COLOR_ATTACHMENT),
            vec![
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ]
        );
    }

    #[test]
    fn test_depth_chain() {
        assert_eq!(
            deferred().layout_chain(DEPTH_ATTACHMENT),
            vec![
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ]
        );
    }

    #[test]
    fn test_swapchain_chain() {
        assert_eq!(
            deferred().layout_chain(SWAPCHAIN_ATTACHMENT),
            vec![
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ]
        );
    }

    #[test]
    fn test_missing_geometry_to_composite_dependency_fails() {
        let mut layout = deferred();
        layout
            .dependencies
            .retain(|d| !(d.src_subpass == GEOMETRY_SUBPASS && d.dst_subpass == COMPOSITE_SUBPASS));

        let err = layout.validate().unwrap_err();
        assert!(matches!(err, RhiError::RenderPassError(_)));
    }

    #[test]
    fn test_dependency_must_reach_fragment_shader() {
        let mut layout = deferred();
        for dep in &mut layout.dependencies {
            if dep.src_subpass == GEOMETRY_SUBPASS {
                dep.dst_stage_mask = vk::PipelineStageFlags::VERTEX_SHADER;
            }
        }
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_missing_present_dependency_fails() {
        let mut layout = deferred();
        layout
            .dependencies
            .retain(|d| d.dst_subpass != vk::SUBPASS_EXTERNAL);
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_missing_external_entry_dependency_fails() {
        let mut layout = deferred();
        layout
            .dependencies
            .retain(|d| d.src_subpass != vk::SUBPASS_EXTERNAL);
        assert!(layout.validate().is_err());
    }

    fn external_entry(layout: &mut RenderPassLayout) -> &mut vk::SubpassDependency {
        layout
            .dependencies
            .iter_mut()
            .find(|d| d.src_subpass == vk::SUBPASS_EXTERNAL && d.dst_subpass == GEOMETRY_SUBPASS)
            .unwrap()
    }

    #[test]
    fn test_external_entry_covers_depth_clear() {
        let mut layout = deferred();
        let dep = *external_entry(&mut layout);

        assert!(
            dep.dst_stage_mask
                .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        );
        assert!(
            dep.src_stage_mask
                .contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS)
        );
        assert!(
            dep.dst_access_mask
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
    }

    #[test]
    fn test_color_only_external_entry_fails_for_depth() {
        let mut layout = deferred();
        let dep = external_entry(&mut layout);
        dep.dst_stage_mask = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        dep.dst_access_mask =
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;

        let err = layout.validate().unwrap_err();
        match err {
            RhiError::RenderPassError(msg) => {
                assert!(msg.contains(&format!("attachment {}", DEPTH_ATTACHMENT)))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_debug_output_skips_clear_values() {
        let text = format!("{:?}", deferred());
        assert!(text.contains("D32_SFLOAT"));
        assert!(text.contains("PRESENT_SRC_KHR"));
        assert!(!text.contains("clear_value"));
    }

    #[test]
    fn test_out_of_range_reference_fails() {
        let mut layout = deferred();
        layout.subpasses[1].input.push(vk::AttachmentReference {
            attachment: 7,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        });
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_clear_values_follow_attachment_order() {
        let clears = deferred().clear_values();
        assert_eq!(clears.len(), 3);
        unsafe {
            assert_eq!(clears[0].color.float32, [0.0, 0.0, 0.0, 0.0]);
            assert_eq!(clears[1].color.float32, [0.6, 0.65, 0.4, 1.0]);
            assert_eq!(clears[2].depth_stencil.depth, 1.0);
        }
    }
}

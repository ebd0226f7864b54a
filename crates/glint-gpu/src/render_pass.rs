//! Render pass and render target wrappers.

use ash::vk;
use glint_core::{AttachmentUsage, ClearFlags, RenderPassConfig, StoreOp};

use crate::convert::{format_to_vk, load_op_to_vk, store_op_to_vk};
use crate::error::{GpuError, Result};

/// A render pass: the declared sequence of attachment operations for one
/// drawing pass. Holds its clear values and render area so begin recording
/// needs nothing beyond a target.
pub struct RenderPass {
    render_pass: vk::RenderPass,
    config: RenderPassConfig,
    device: ash::Device,
}

impl RenderPass {
    /// Create a render pass from an attachment configuration.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, config: RenderPassConfig) -> Result<Self> {
        if config.attachments.is_empty() {
            return Err(GpuError::InvalidState(
                "render pass needs at least one attachment".to_string(),
            ));
        }

        let mut descriptions = Vec::with_capacity(config.attachments.len());
        let mut color_refs = Vec::new();
        let mut depth_ref = None;

        for (index, attachment) in config.attachments.iter().enumerate() {
            let is_depth = attachment.usage == AttachmentUsage::DepthStencil;
            let clear = if is_depth {
                config.clear_flags.contains(ClearFlags::DEPTH)
            } else {
                config.clear_flags.contains(ClearFlags::COLOR)
            };
            let stencil_clear = config.clear_flags.contains(ClearFlags::STENCIL);

            let (initial_layout, final_layout) = attachment_layouts(attachment, is_depth);

            descriptions.push(
                vk::AttachmentDescription::default()
                    .format(format_to_vk(attachment.format))
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(load_op_to_vk(attachment.load_op, clear))
                    .store_op(store_op_to_vk(attachment.store_op))
                    .stencil_load_op(if is_depth && stencil_clear {
                        vk::AttachmentLoadOp::CLEAR
                    } else {
                        vk::AttachmentLoadOp::DONT_CARE
                    })
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(initial_layout)
                    .final_layout(final_layout),
            );

            let reference = vk::AttachmentReference::default()
                .attachment(index as u32)
                .layout(if is_depth {
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                } else {
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                });

            if is_depth {
                if depth_ref.is_some() {
                    return Err(GpuError::InvalidState(
                        "render pass has more than one depth attachment".to_string(),
                    ));
                }
                depth_ref = Some(reference);
            } else {
                color_refs.push(reference);
            }
        }

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(ref depth) = depth_ref {
            subpass = subpass.depth_stencil_attachment(depth);
        }

        // One external dependency covering color and depth writes.
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&descriptions)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        let render_pass = device.create_render_pass(&create_info, None)?;

        Ok(Self {
            render_pass,
            config,
            device: device.clone(),
        })
    }

    /// Get the raw render pass handle.
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// The configuration this pass was built from.
    pub fn config(&self) -> &RenderPassConfig {
        &self.config
    }

    /// Update the render area after a resize.
    pub fn set_render_area(&mut self, width: u32, height: u32) {
        self.config.render_area = (0, 0, width, height);
    }

    /// Begin this pass on a command buffer, targeting a framebuffer.
    ///
    /// # Safety
    /// The command buffer must be recording and the target must have been
    /// created against this pass.
    pub unsafe fn begin(&self, cmd: vk::CommandBuffer, target: &RenderTarget) {
        let clear_values = self.clear_values();
        let (x, y, width, height) = self.config.render_area;

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(target.handle())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x, y },
                extent: vk::Extent2D { width, height },
            })
            .clear_values(&clear_values);

        self.device
            .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
    }

    /// End this pass on a command buffer.
    ///
    /// # Safety
    /// The command buffer must be recording inside this pass.
    pub unsafe fn end(&self, cmd: vk::CommandBuffer) {
        self.device.cmd_end_render_pass(cmd);
    }

    /// Per-attachment clear values in attachment order.
    fn clear_values(&self) -> Vec<vk::ClearValue> {
        self.config
            .attachments
            .iter()
            .map(|attachment| match attachment.usage {
                AttachmentUsage::Color => vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: self.config.clear_color,
                    },
                },
                AttachmentUsage::DepthStencil => vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: self.config.clear_depth,
                        stencil: self.config.clear_stencil,
                    },
                },
            })
            .collect()
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Initial and final layouts for one attachment description.
fn attachment_layouts(
    attachment: &glint_core::AttachmentConfig,
    is_depth: bool,
) -> (vk::ImageLayout, vk::ImageLayout) {
    use glint_core::LoadOp;

    let working_layout = if is_depth {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    };

    // Loading previous contents requires a defined initial layout.
    let initial = match attachment.load_op {
        LoadOp::Load => working_layout,
        LoadOp::DontCare => vk::ImageLayout::UNDEFINED,
    };

    let final_layout = if attachment.present_after {
        vk::ImageLayout::PRESENT_SRC_KHR
    } else if !is_depth && attachment.store_op == StoreOp::Store {
        // Stored offscreen color is meant to be sampled later.
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else {
        working_layout
    };

    (initial, final_layout)
}

/// A render target: the concrete set of image attachments one pass writes.
pub struct RenderTarget {
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    device: ash::Device,
}

impl RenderTarget {
    /// Create a framebuffer over the given attachment views.
    ///
    /// Views must match the pass's attachment list in order and count.
    ///
    /// # Safety
    /// The device, pass and views must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        render_pass: &RenderPass,
        views: &[vk::ImageView],
        width: u32,
        height: u32,
    ) -> Result<Self> {
        if views.len() != render_pass.config().attachments.len() {
            return Err(GpuError::InvalidState(format!(
                "render target has {} views but the pass declares {} attachments",
                views.len(),
                render_pass.config().attachments.len()
            )));
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(views)
            .width(width)
            .height(height)
            .layers(1);

        let framebuffer = device.create_framebuffer(&create_info, None)?;

        Ok(Self {
            framebuffer,
            extent: vk::Extent2D { width, height },
            device: device.clone(),
        })
    }

    /// Get the raw framebuffer handle.
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Target extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_core::{AttachmentConfig, LoadOp, TextureFormat};

    fn color(present_after: bool, store_op: StoreOp) -> AttachmentConfig {
        AttachmentConfig {
            format: TextureFormat::Bgra8Srgb,
            usage: AttachmentUsage::Color,
            load_op: LoadOp::DontCare,
            store_op,
            present_after,
        }
    }

    #[test]
    fn presentable_color_ends_in_present_layout() {
        let (initial, final_layout) = attachment_layouts(&color(true, StoreOp::Store), false);
        assert_eq!(initial, vk::ImageLayout::UNDEFINED);
        assert_eq!(final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn stored_offscreen_color_becomes_sampleable() {
        let (_, final_layout) = attachment_layouts(&color(false, StoreOp::Store), false);
        assert_eq!(final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn loaded_attachment_keeps_working_layout_on_entry() {
        let mut attachment = color(false, StoreOp::DontCare);
        attachment.load_op = LoadOp::Load;
        let (initial, _) = attachment_layouts(&attachment, false);
        assert_eq!(initial, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }
}

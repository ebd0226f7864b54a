//! Graphics pipeline creation.
//!
//! Pipelines are built entirely from reflection output: the caller never
//! declares vertex layouts, descriptor layouts or push-constant ranges by
//! hand.

use ash::vk;
use glint_core::{DepthFlags, Topology};

use crate::descriptors::{DescriptorLayoutCache, LayoutBinding};
use crate::error::{GpuError, Result};
use crate::reflect::{stage_flags, ShaderReflection};
use crate::shader::ShaderBinary;

/// Fixed-function configuration for a graphics pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub topology: Topology,
    pub depth: DepthFlags,
    /// Viewport extent; the builder computes the flipped-Y viewport.
    pub viewport_width: u32,
    pub viewport_height: u32,
}

/// Graphics pipeline wrapper.
///
/// Owns the pipeline and its layout; descriptor set layouts are owned by
/// the layout cache and shared between structurally identical pipelines.
pub struct GraphicsPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_ranges: Vec<vk::PushConstantRange>,
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
    device: ash::Device,
}

impl GraphicsPipeline {
    /// Create a graphics pipeline from stage binaries and their reflection.
    ///
    /// # Safety
    /// The device, render pass and layout cache must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        stages: &[(glint_core::ShaderStage, &ShaderBinary)],
        reflection: &ShaderReflection,
        layout_cache: &mut DescriptorLayoutCache,
        config: &PipelineConfig,
        render_pass: vk::RenderPass,
        color_attachment_count: u32,
    ) -> Result<Self> {
        // Descriptor set layouts in explicit set-index order. Gaps get an
        // empty layout so the array stays addressable by set index.
        let set_count = reflection.max_set_index().map_or(0, |max| max + 1);
        let mut set_layouts = Vec::with_capacity(set_count as usize);
        for set_index in 0..set_count {
            let bindings: Vec<LayoutBinding> = reflection
                .set(set_index)
                .map(|set| {
                    set.bindings
                        .iter()
                        .map(|b| LayoutBinding {
                            binding: b.binding,
                            descriptor_type: b.kind.into(),
                            count: b.count,
                            stages: b.stages,
                        })
                        .collect()
                })
                .unwrap_or_default();
            set_layouts.push(layout_cache.get_or_create(device, &bindings)?);
        }

        let push_ranges: Vec<vk::PushConstantRange> = reflection
            .push_constant_ranges
            .iter()
            .map(|range| {
                vk::PushConstantRange::default()
                    .stage_flags(range.stages)
                    .offset(range.offset)
                    .size(range.size)
            })
            .collect();

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);

        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;

        // Stage modules; destroyed after pipeline creation either way.
        let mut modules = Vec::with_capacity(stages.len());
        for &(stage, binary) in stages {
            let module_info = vk::ShaderModuleCreateInfo::default().code(binary.words());
            match device.create_shader_module(&module_info, None) {
                Ok(module) => modules.push((stage, module)),
                Err(e) => {
                    for &(_, module) in &modules {
                        device.destroy_shader_module(module, None);
                    }
                    device.destroy_pipeline_layout(layout, None);
                    return Err(GpuError::ShaderModule(format!("{stage:?}: {e}")));
                }
            }
        }

        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = modules
            .iter()
            .map(|&(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage_flags(stage))
                    .module(module)
                    .name(c"main")
            })
            .collect();

        // Vertex input from reflection
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = reflection
            .vertex_attributes
            .iter()
            .map(|attr| {
                vk::VertexInputAttributeDescription::default()
                    .location(attr.location)
                    .binding(0)
                    .format(attr.format)
                    .offset(attr.offset)
            })
            .collect();

        let vertex_bindings = if reflection.vertex_attributes.is_empty() {
            vec![]
        } else {
            vec![vk::VertexInputBindingDescription::default()
                .binding(0)
                .stride(reflection.vertex_stride)
                .input_rate(vk::VertexInputRate::VERTEX)]
        };

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        // Input assembly
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology_to_vk(config.topology))
            .primitive_restart_enable(false);

        let tessellation = vk::PipelineTessellationStateCreateInfo::default()
            .patch_control_points(reflection.tessellation_control_points.unwrap_or(3));

        // Viewport (dynamic, but the flipped viewport is fixed at build time)
        let viewport = flipped_viewport(config.viewport_width, config.viewport_height);
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: config.viewport_width,
                height: config.viewport_height,
            },
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        // Rasterization
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        // Multisampling
        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        // Depth stencil
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(config.depth.contains(DepthFlags::TEST))
            .depth_write_enable(config.depth.contains(DepthFlags::WRITE))
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // Standard alpha blending on every color attachment
        let color_blend_attachments: Vec<_> = (0..color_attachment_count)
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(true)
                    .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                    .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                    .color_blend_op(vk::BlendOp::ADD)
                    .src_alpha_blend_factor(vk::BlendFactor::SRC_ALPHA)
                    .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                    .alpha_blend_op(vk::BlendOp::ADD)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();

        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        // Dynamic state
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        if config.topology == Topology::PatchList {
            pipeline_info = pipeline_info.tessellation_state(&tessellation);
        }

        let pipelines = device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        );

        // Modules are no longer needed whether creation worked or not
        for &(_, module) in &modules {
            device.destroy_shader_module(module, None);
        }

        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                device.destroy_pipeline_layout(layout, None);
                return Err(GpuError::PipelineCreation(e.to_string()));
            }
        };

        Ok(Self {
            pipeline,
            layout,
            set_layouts,
            push_ranges,
            viewport,
            scissor,
            device: device.clone(),
        })
    }

    /// Get the raw pipeline handle.
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get the pipeline layout handle.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Descriptor set layout for an explicit set index.
    pub fn set_layout(&self, set: u32) -> Option<vk::DescriptorSetLayout> {
        self.set_layouts.get(set as usize).copied()
    }

    /// Reflected push-constant ranges of this pipeline.
    pub fn push_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_ranges
    }

    /// Bind the pipeline and its flipped-Y viewport.
    ///
    /// # Safety
    /// The command buffer must be recording inside a compatible pass.
    pub unsafe fn bind(&self, cmd: vk::CommandBuffer) {
        self.device
            .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        self.device.cmd_set_viewport(cmd, 0, &[self.viewport]);
        self.device.cmd_set_scissor(cmd, 0, &[self.scissor]);
    }

    /// Update the viewport after a resize. Takes effect on the next bind.
    pub fn set_viewport_extent(&mut self, width: u32, height: u32) {
        self.viewport = flipped_viewport(width, height);
        self.scissor.extent = vk::Extent2D { width, height };
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Viewport with the flipped-Y convention: origin at the bottom edge and
/// negative height, normalizing coordinate handedness against Vulkan's
/// default.
pub fn flipped_viewport(width: u32, height: u32) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: height as f32,
        width: width as f32,
        height: -(height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn topology_to_vk(topology: Topology) -> vk::PrimitiveTopology {
    match topology {
        Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
        Topology::PatchList => vk::PrimitiveTopology::PATCH_LIST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_is_y_flipped() {
        let viewport = flipped_viewport(800, 600);
        assert_eq!(viewport.y, 600.0);
        assert_eq!(viewport.height, -600.0);
        assert_eq!(viewport.width, 800.0);
        assert_eq!(viewport.min_depth, 0.0);
        assert_eq!(viewport.max_depth, 1.0);
    }

    #[test]
    fn topology_mapping() {
        assert_eq!(
            topology_to_vk(Topology::TriangleList),
            vk::PrimitiveTopology::TRIANGLE_LIST
        );
        assert_eq!(
            topology_to_vk(Topology::PatchList),
            vk::PrimitiveTopology::PATCH_LIST
        );
    }
}

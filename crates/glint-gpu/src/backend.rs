//! The Vulkan backend: one object owning the context, surface, frame
//! manager and descriptor machinery, implementing every frontend
//! operation.
//!
//! All state lives in this explicit object; nothing is process-global.
//! Calls happen on one rendering thread, with the GPU running ahead by up
//! to the frame-in-flight count.

use ash::vk;
use glint_core::{RendererConfig, RenderPassConfig, ShaderConfig, TextureFormat};
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::command::CommandPool;
use crate::context::{GpuContext, GpuContextBuilder};
use crate::descriptors::{
    write_combined_image_sampler, write_uniform_buffer, DescriptorLayoutCache,
    DescriptorSetAllocator,
};
use crate::error::{GpuError, Result};
use crate::frame::FrameManager;
use crate::memory::GpuBuffer;
use crate::pipeline::{GraphicsPipeline, PipelineConfig};
use crate::reflect::{reflect, ShaderReflection};
use crate::render_pass::{RenderPass, RenderTarget};
use crate::shader::ShaderBinary;
use crate::surface::SurfaceContext;
use crate::texture::{Attachment, GpuTexture};

/// A shader as the frontend sees it: the pipeline plus the reflection it
/// was built from.
pub struct VulkanShader {
    pipeline: GraphicsPipeline,
    reflection: ShaderReflection,
}

impl VulkanShader {
    /// The reflection data this shader's pipeline was derived from.
    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    /// Update the pipeline's viewport after a surface resize. Takes effect
    /// on the next bind.
    pub fn set_viewport_extent(&mut self, width: u32, height: u32) {
        self.pipeline.set_viewport_extent(width, height);
    }

    pub(crate) fn pipeline(&self) -> &GraphicsPipeline {
        &self.pipeline
    }
}

/// One resource bound into a descriptor set.
pub enum DescriptorResource<'a> {
    UniformBuffer(&'a GpuBuffer),
    SampledTexture(&'a GpuTexture),
    AttachmentTexture(&'a Attachment),
}

/// One `{binding, resource}` entry of a descriptor set description.
pub struct DescriptorWrite<'a> {
    pub binding: u32,
    pub resource: DescriptorResource<'a>,
}

/// A descriptor set handle plus the set index it binds at.
///
/// Invalidated wholesale by [`VulkanBackend::reset_descriptor_pools`].
#[derive(Clone, Copy)]
pub struct VulkanDescriptorSet {
    set: vk::DescriptorSet,
    set_index: u32,
}

/// The Vulkan rendering backend.
///
/// Field order is teardown order: everything referencing the device drops
/// before the context destroys it.
pub struct VulkanBackend {
    frames: FrameManager,
    layout_cache: DescriptorLayoutCache,
    set_allocator: DescriptorSetAllocator,
    /// Pool for one-off upload command buffers.
    upload_pool: CommandPool,
    surface: SurfaceContext,
    context: GpuContext,
    config: RendererConfig,
}

impl VulkanBackend {
    /// Initialize the backend against a window surface.
    pub fn new<W>(window: &W, width: u32, height: u32, config: RendererConfig) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let context = GpuContextBuilder::new()
            .app_name(config.app_name.clone())
            .validation(config.validation)
            .build()?;

        let surface = unsafe { SurfaceContext::from_window(&context, window)? };
        let frames = unsafe {
            FrameManager::new(
                &context,
                &surface,
                width,
                height,
                config.vsync,
                config.fence_timeout_ns,
            )?
        };
        let upload_pool = unsafe {
            CommandPool::new(
                context.device(),
                context.graphics_queue_family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
            )?
        };

        Ok(Self {
            context,
            surface,
            frames,
            layout_cache: DescriptorLayoutCache::new(),
            set_allocator: DescriptorSetAllocator::new(),
            upload_pool,
            config,
        })
    }

    /// The GPU context, for capability queries.
    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Resize the presentation surface.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        unsafe { self.frames.resize(&self.context, &self.surface, width, height) }
    }

    /// Begin a frame. Returns `false` when the frame was skipped because
    /// the swapchain had to be recreated; retry next loop iteration.
    pub fn begin_frame(&mut self) -> Result<bool> {
        let cmd = unsafe { self.frames.begin_frame(&self.context, &self.surface)? };
        Ok(cmd.is_some())
    }

    /// End the current frame: submit and present.
    pub fn end_frame(&mut self) -> Result<()> {
        unsafe { self.frames.end_frame(&self.context, &self.surface) }
    }

    /// Issue a non-indexed draw.
    pub fn draw(&self, vertex_count: u32) -> Result<()> {
        let cmd = self.recording_command_buffer()?;
        unsafe { self.context.device().cmd_draw(cmd, vertex_count, 1, 0, 0) };
        Ok(())
    }

    /// Issue an indexed draw.
    pub fn draw_indexed(&self, index_count: u32) -> Result<()> {
        let cmd = self.recording_command_buffer()?;
        unsafe {
            self.context
                .device()
                .cmd_draw_indexed(cmd, index_count, 1, 0, 0, 0)
        };
        Ok(())
    }

    /// Begin a render pass targeting the given render target.
    pub fn begin_render_pass(&self, pass: &RenderPass, target: &RenderTarget) -> Result<()> {
        let cmd = self.recording_command_buffer()?;
        unsafe { pass.begin(cmd, target) };
        Ok(())
    }

    /// Begin the window render pass on the currently acquired image.
    pub fn begin_window_render_pass(&self) -> Result<()> {
        let cmd = self.recording_command_buffer()?;
        let target = self.frames.current_target().ok_or_else(|| {
            GpuError::InvalidState("no acquired image to target".to_string())
        })?;
        unsafe { self.frames.window_pass().begin(cmd, target) };
        Ok(())
    }

    /// End the active render pass.
    pub fn end_render_pass(&self) -> Result<()> {
        let cmd = self.recording_command_buffer()?;
        unsafe { self.context.device().cmd_end_render_pass(cmd) };
        Ok(())
    }

    /// Bind a shader's pipeline and flipped-Y viewport.
    pub fn bind_shader(&self, shader: &VulkanShader) -> Result<()> {
        let cmd = self.recording_command_buffer()?;
        unsafe { shader.pipeline().bind(cmd) };
        Ok(())
    }

    /// Bind a vertex buffer at binding zero.
    pub fn bind_vertex_buffer(&self, buffer: &GpuBuffer) -> Result<()> {
        let cmd = self.recording_command_buffer()?;
        unsafe {
            self.context
                .device()
                .cmd_bind_vertex_buffers(cmd, 0, &[buffer.handle()], &[0]);
        }
        Ok(())
    }

    /// Bind a 32-bit index buffer.
    pub fn bind_index_buffer(&self, buffer: &GpuBuffer) -> Result<()> {
        let cmd = self.recording_command_buffer()?;
        unsafe {
            self.context.device().cmd_bind_index_buffer(
                cmd,
                buffer.handle(),
                0,
                vk::IndexType::UINT32,
            );
        }
        Ok(())
    }

    /// Bind a descriptor set at its reflected set index.
    pub fn bind_descriptor_set(
        &self,
        shader: &VulkanShader,
        set: &VulkanDescriptorSet,
    ) -> Result<()> {
        let cmd = self.recording_command_buffer()?;
        unsafe {
            self.context.device().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                shader.pipeline().layout(),
                set.set_index,
                &[set.set],
                &[],
            );
        }
        Ok(())
    }

    /// Push constants into every reflected range covered by `data`.
    pub fn push_constants(&self, shader: &VulkanShader, data: &[u8]) -> Result<()> {
        let cmd = self.recording_command_buffer()?;
        for range in shader.pipeline().push_ranges() {
            let start = range.offset as usize;
            let end = start + range.size as usize;
            let slice = data.get(start..end).ok_or_else(|| {
                GpuError::InvalidState(format!(
                    "push constant data is {} bytes but the shader expects {end}",
                    data.len()
                ))
            })?;
            unsafe {
                self.context.device().cmd_push_constants(
                    cmd,
                    shader.pipeline().layout(),
                    range.stage_flags,
                    range.offset,
                    slice,
                );
            }
        }
        Ok(())
    }

    /// Allocate a host-visible vertex buffer and fill it.
    pub fn create_vertex_buffer(&self, data: &[u8]) -> Result<GpuBuffer> {
        let buffer = self.context.allocator().create_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::CpuToGpu,
            "vertex_buffer",
        )?;
        buffer.write_bytes(0, data)?;
        Ok(buffer)
    }

    /// Allocate a host-visible index buffer (32-bit indices) and fill it.
    pub fn create_index_buffer(&self, indices: &[u32]) -> Result<GpuBuffer> {
        let buffer = self.context.allocator().create_buffer(
            std::mem::size_of_val(indices) as u64,
            vk::BufferUsageFlags::INDEX_BUFFER,
            MemoryLocation::CpuToGpu,
            "index_buffer",
        )?;
        buffer.write(indices)?;
        Ok(buffer)
    }

    /// Allocate a host-visible uniform buffer of the given size.
    ///
    /// Callers must not overwrite contents still read by an in-flight
    /// frame; there is no implicit per-frame copy.
    pub fn create_uniform_buffer(&self, size: u64) -> Result<GpuBuffer> {
        self.context.allocator().create_buffer(
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            "uniform_buffer",
        )
    }

    /// Load, reflect and build a shader pipeline against a render pass.
    pub fn create_shader(
        &mut self,
        config: &ShaderConfig,
        pass: &RenderPass,
    ) -> Result<VulkanShader> {
        let pass_handle = pass.handle();
        let color_count = color_attachment_count(pass);
        self.build_shader(config, pass_handle, color_count)
    }

    /// Build a shader against the window render pass.
    pub fn create_shader_for_window(&mut self, config: &ShaderConfig) -> Result<VulkanShader> {
        let pass = self.frames.window_pass();
        let pass_handle = pass.handle();
        let color_count = color_attachment_count(pass);
        self.build_shader(config, pass_handle, color_count)
    }

    fn build_shader(
        &mut self,
        config: &ShaderConfig,
        pass_handle: vk::RenderPass,
        color_attachment_count: u32,
    ) -> Result<VulkanShader> {
        let mut binaries = Vec::with_capacity(config.stages.len());
        for (stage, path) in &config.stages {
            binaries.push((*stage, ShaderBinary::load(path)?));
        }
        let stage_refs: Vec<_> = binaries
            .iter()
            .map(|(stage, binary)| (*stage, binary))
            .collect();

        let reflection = reflect(&stage_refs, self.config.duplicate_binding)?;

        let pipeline_config = PipelineConfig {
            topology: config.topology,
            depth: config.depth,
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
        };

        let pipeline = unsafe {
            GraphicsPipeline::new(
                self.context.device(),
                &stage_refs,
                &reflection,
                &mut self.layout_cache,
                &pipeline_config,
                pass_handle,
                color_attachment_count,
            )?
        };

        Ok(VulkanShader {
            pipeline,
            reflection,
        })
    }

    /// Create a sampled texture from tightly packed pixels.
    pub fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: &[u8],
    ) -> Result<GpuTexture> {
        unsafe { GpuTexture::new(&self.context, &self.upload_pool, width, height, format, pixels) }
    }

    /// Create an offscreen attachment image.
    pub fn create_attachment(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Attachment> {
        unsafe { Attachment::new(&self.context, width, height, format) }
    }

    /// Create a render pass from an attachment configuration.
    pub fn create_render_pass(&self, config: RenderPassConfig) -> Result<RenderPass> {
        unsafe { RenderPass::new(self.context.device(), config) }
    }

    /// Create a render target over attachment images for a pass.
    pub fn create_render_target(
        &self,
        pass: &RenderPass,
        attachments: &[&Attachment],
        width: u32,
        height: u32,
    ) -> Result<RenderTarget> {
        let views: Vec<vk::ImageView> = attachments.iter().map(|a| a.view()).collect();
        unsafe { RenderTarget::new(self.context.device(), pass, &views, width, height) }
    }

    /// Allocate and write a descriptor set for one of a shader's reflected
    /// sets.
    pub fn create_descriptor_set(
        &mut self,
        shader: &VulkanShader,
        set_index: u32,
        writes: &[DescriptorWrite<'_>],
    ) -> Result<VulkanDescriptorSet> {
        let layout = shader.pipeline().set_layout(set_index).ok_or_else(|| {
            GpuError::InvalidState(format!("shader has no descriptor set {set_index}"))
        })?;

        let device = self.context.device();
        let set = unsafe { self.set_allocator.allocate(device, layout)? };

        for write in writes {
            match write.resource {
                DescriptorResource::UniformBuffer(buffer) => unsafe {
                    write_uniform_buffer(
                        device,
                        set,
                        write.binding,
                        buffer.handle(),
                        0,
                        buffer.size(),
                    );
                },
                DescriptorResource::SampledTexture(texture) => unsafe {
                    write_combined_image_sampler(
                        device,
                        set,
                        write.binding,
                        texture.view(),
                        texture.sampler(),
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    );
                },
                DescriptorResource::AttachmentTexture(attachment) => unsafe {
                    write_combined_image_sampler(
                        device,
                        set,
                        write.binding,
                        attachment.view(),
                        attachment.sampler(),
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    );
                },
            }
        }

        Ok(VulkanDescriptorSet { set, set_index })
    }

    /// Bulk-reclaim every descriptor pool. All previously allocated
    /// descriptor sets become invalid at once.
    pub fn reset_descriptor_pools(&mut self) -> Result<()> {
        self.context.wait_idle()?;
        unsafe { self.set_allocator.reset(self.context.device()) }
    }

    /// The render pass drawing into the window.
    pub fn window_render_pass(&self) -> &RenderPass {
        self.frames.window_pass()
    }

    /// The render target for the currently acquired swapchain image.
    pub fn current_window_render_target(&self) -> Option<&RenderTarget> {
        self.frames.current_target()
    }

    /// Wait until the device is idle.
    pub fn wait_idle(&self) -> Result<()> {
        self.context.wait_idle()
    }

    fn recording_command_buffer(&self) -> Result<vk::CommandBuffer> {
        self.frames.current_command_buffer().ok_or_else(|| {
            GpuError::InvalidState("no frame is recording; call begin_frame first".to_string())
        })
    }
}

fn color_attachment_count(pass: &RenderPass) -> u32 {
    pass.config()
        .attachments
        .iter()
        .filter(|a| a.usage == glint_core::AttachmentUsage::Color)
        .count() as u32
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        // Teardown order matters: drain the GPU, then destroy everything
        // that references the device before the context itself drops.
        if let Err(e) = self.context.wait_idle() {
            tracing::error!("wait_idle failed during shutdown: {e}");
        }
        unsafe {
            self.frames.destroy(&self.context, &self.surface);
            self.set_allocator.destroy(self.context.device());
            self.layout_cache.destroy(self.context.device());
            self.upload_pool.destroy(self.context.device());
            self.surface.destroy();
        }
    }
}

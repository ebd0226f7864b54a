//! The renderer facade.

use glint_core::{BackendKind, RenderPassConfig, RendererConfig, ShaderConfig, TextureFormat};
use glint_gpu::error::Result;
use glint_gpu::{DescriptorResource, DescriptorWrite, VulkanBackend};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::resources::{
    Attachment, AttachmentInner, BufferInner, DescriptorBinding, DescriptorSet,
    DescriptorSetInner, IndexBuffer, RenderPass, RenderPassInner, RenderTarget, RenderTargetInner,
    Shader, ShaderInner, Texture, TextureInner, UniformBuffer, VertexBuffer,
};

/// Which render pass an operation targets.
#[derive(Clone, Copy)]
pub enum PassTarget<'a> {
    /// The pass drawing into the window surface.
    Window,
    /// A caller-created offscreen pass.
    Offscreen(&'a RenderPass),
}

/// Which render target a pass draws into.
#[derive(Clone, Copy)]
pub enum DrawTarget<'a> {
    /// The render target of the currently acquired swapchain image.
    Window,
    /// A caller-created offscreen target.
    Offscreen(&'a RenderTarget),
}

/// The active backend, selected once at initialization.
enum Backend {
    Vulkan(VulkanBackend),
}

/// The renderer application code drives.
///
/// One rendering thread owns the renderer; the GPU runs ahead by up to
/// the frame-in-flight count. Dropping the renderer drains the device and
/// releases everything it owns — caller-allocated resources must be
/// dropped first.
pub struct Renderer {
    backend: Backend,
}

impl Renderer {
    /// Initialize the renderer against a window.
    ///
    /// Initialization failure is fatal: there is no fallback backend.
    pub fn new<W>(
        window: &W,
        width: u32,
        height: u32,
        backend: BackendKind,
        config: RendererConfig,
    ) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let backend = match backend {
            BackendKind::Vulkan => {
                Backend::Vulkan(VulkanBackend::new(window, width, height, config)?)
            }
        };
        tracing::info!("Renderer initialized");
        Ok(Self { backend })
    }

    /// Resize the presentation surface. Drains the device and rebuilds
    /// the swapchain at the new extent.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let Backend::Vulkan(backend) = &mut self.backend;
        backend.resize(width, height)
    }

    /// Begin a frame.
    ///
    /// Returns `false` when the frame was skipped (surface out of date and
    /// recreated); run the next loop iteration and try again. A failed
    /// frame is not retried synchronously.
    pub fn begin_frame(&mut self) -> Result<bool> {
        let Backend::Vulkan(backend) = &mut self.backend;
        backend.begin_frame()
    }

    /// End the frame: submit recorded work and present.
    pub fn end_frame(&mut self) -> Result<()> {
        let Backend::Vulkan(backend) = &mut self.backend;
        backend.end_frame()
    }

    /// Draw `vertex_count` vertices from the bound vertex buffer.
    pub fn draw(&self, vertex_count: u32) -> Result<()> {
        let Backend::Vulkan(backend) = &self.backend;
        backend.draw(vertex_count)
    }

    /// Draw `index_count` indices from the bound index buffer.
    pub fn draw_indexed(&self, index_count: u32) -> Result<()> {
        let Backend::Vulkan(backend) = &self.backend;
        backend.draw_indexed(index_count)
    }

    /// Begin a render pass on the current frame's command buffer.
    pub fn begin_render_pass(&self, pass: PassTarget<'_>, target: DrawTarget<'_>) -> Result<()> {
        let Backend::Vulkan(backend) = &self.backend;
        match (pass, target) {
            (PassTarget::Window, DrawTarget::Window) => backend.begin_window_render_pass(),
            (PassTarget::Offscreen(pass), DrawTarget::Offscreen(target)) => {
                let RenderPassInner::Vulkan(pass) = &pass.inner;
                let RenderTargetInner::Vulkan(target) = &target.inner;
                backend.begin_render_pass(pass, target)
            }
            (PassTarget::Window, DrawTarget::Offscreen(target)) => {
                let RenderTargetInner::Vulkan(target) = &target.inner;
                backend.begin_render_pass(backend.window_render_pass(), target)
            }
            (PassTarget::Offscreen(pass), DrawTarget::Window) => {
                let RenderPassInner::Vulkan(pass) = &pass.inner;
                let target = backend.current_window_render_target().ok_or_else(|| {
                    glint_gpu::GpuError::InvalidState("no acquired image to target".to_string())
                })?;
                backend.begin_render_pass(pass, target)
            }
        }
    }

    /// End the active render pass.
    pub fn end_render_pass(&self) -> Result<()> {
        let Backend::Vulkan(backend) = &self.backend;
        backend.end_render_pass()
    }

    /// Bind a shader's pipeline.
    pub fn bind_shader(&self, shader: &Shader) -> Result<()> {
        let Backend::Vulkan(backend) = &self.backend;
        let ShaderInner::Vulkan(shader) = &shader.inner;
        backend.bind_shader(shader)
    }

    /// Bind a vertex buffer.
    pub fn bind_vertex_buffer(&self, buffer: &VertexBuffer) -> Result<()> {
        let Backend::Vulkan(backend) = &self.backend;
        let BufferInner::Vulkan(buffer) = &buffer.inner;
        backend.bind_vertex_buffer(buffer)
    }

    /// Bind an index buffer.
    pub fn bind_index_buffer(&self, buffer: &IndexBuffer) -> Result<()> {
        let Backend::Vulkan(backend) = &self.backend;
        let BufferInner::Vulkan(buffer) = &buffer.inner;
        backend.bind_index_buffer(buffer)
    }

    /// Bind a descriptor set at its reflected set index.
    pub fn bind_descriptor_set(&self, shader: &Shader, set: &DescriptorSet) -> Result<()> {
        let Backend::Vulkan(backend) = &self.backend;
        let ShaderInner::Vulkan(shader) = &shader.inner;
        let DescriptorSetInner::Vulkan(set) = &set.inner;
        backend.bind_descriptor_set(shader, set)
    }

    /// Push constants for the bound shader.
    pub fn push_constants(&self, shader: &Shader, data: &[u8]) -> Result<()> {
        let Backend::Vulkan(backend) = &self.backend;
        let ShaderInner::Vulkan(shader) = &shader.inner;
        backend.push_constants(shader, data)
    }

    /// Allocate a vertex buffer from typed vertex data.
    pub fn create_vertex_buffer<T: bytemuck::Pod>(&self, vertices: &[T]) -> Result<VertexBuffer> {
        let Backend::Vulkan(backend) = &self.backend;
        let buffer = backend.create_vertex_buffer(bytemuck::cast_slice(vertices))?;
        Ok(VertexBuffer {
            inner: BufferInner::Vulkan(buffer),
        })
    }

    /// Allocate an index buffer from 32-bit indices.
    pub fn create_index_buffer(&self, indices: &[u32]) -> Result<IndexBuffer> {
        let Backend::Vulkan(backend) = &self.backend;
        let buffer = backend.create_index_buffer(indices)?;
        Ok(IndexBuffer {
            inner: BufferInner::Vulkan(buffer),
        })
    }

    /// Allocate a uniform buffer of `size` bytes.
    pub fn create_uniform_buffer(&self, size: u64) -> Result<UniformBuffer> {
        let Backend::Vulkan(backend) = &self.backend;
        let buffer = backend.create_uniform_buffer(size)?;
        Ok(UniformBuffer {
            inner: BufferInner::Vulkan(buffer),
        })
    }

    /// Load, reflect and build a shader against a render pass.
    ///
    /// A shader binary that cannot be read or reflected is fatal for this
    /// shader; no partial pipeline state is produced.
    pub fn create_shader(&mut self, config: &ShaderConfig, pass: PassTarget<'_>) -> Result<Shader> {
        let Backend::Vulkan(backend) = &mut self.backend;
        let shader = match pass {
            PassTarget::Window => backend.create_shader_for_window(config)?,
            PassTarget::Offscreen(pass) => {
                let RenderPassInner::Vulkan(pass) = &pass.inner;
                backend.create_shader(config, pass)?
            }
        };
        Ok(Shader {
            inner: ShaderInner::Vulkan(shader),
        })
    }

    /// Create a sampled texture from tightly packed pixel data.
    pub fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: &[u8],
    ) -> Result<Texture> {
        let Backend::Vulkan(backend) = &self.backend;
        let texture = backend.create_texture(width, height, format, pixels)?;
        Ok(Texture {
            inner: TextureInner::Vulkan(texture),
        })
    }

    /// Create an offscreen attachment image.
    pub fn create_attachment(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Attachment> {
        let Backend::Vulkan(backend) = &self.backend;
        let attachment = backend.create_attachment(width, height, format)?;
        Ok(Attachment {
            inner: AttachmentInner::Vulkan(attachment),
        })
    }

    /// Create a render pass from an attachment configuration.
    pub fn create_render_pass(&self, config: RenderPassConfig) -> Result<RenderPass> {
        let Backend::Vulkan(backend) = &self.backend;
        let pass = backend.create_render_pass(config)?;
        Ok(RenderPass {
            inner: RenderPassInner::Vulkan(pass),
        })
    }

    /// Create a render target over attachments for an offscreen pass.
    pub fn create_render_target(
        &self,
        pass: &RenderPass,
        attachments: &[&Attachment],
        width: u32,
        height: u32,
    ) -> Result<RenderTarget> {
        let Backend::Vulkan(backend) = &self.backend;
        let RenderPassInner::Vulkan(pass) = &pass.inner;
        let inner_attachments: Vec<&glint_gpu::Attachment> = attachments
            .iter()
            .map(|a| {
                let AttachmentInner::Vulkan(inner) = &a.inner;
                inner
            })
            .collect();
        let target = backend.create_render_target(pass, &inner_attachments, width, height)?;
        Ok(RenderTarget {
            inner: RenderTargetInner::Vulkan(target),
        })
    }

    /// Allocate and fill a descriptor set for one of a shader's reflected
    /// sets.
    pub fn create_descriptor_set(
        &mut self,
        shader: &Shader,
        set_index: u32,
        bindings: &[DescriptorBinding<'_>],
    ) -> Result<DescriptorSet> {
        let Backend::Vulkan(backend) = &mut self.backend;
        let ShaderInner::Vulkan(shader) = &shader.inner;

        let writes: Vec<DescriptorWrite<'_>> = bindings
            .iter()
            .map(|binding| match binding {
                DescriptorBinding::UniformBuffer { binding, buffer } => {
                    let BufferInner::Vulkan(buffer) = &buffer.inner;
                    DescriptorWrite {
                        binding: *binding,
                        resource: DescriptorResource::UniformBuffer(buffer),
                    }
                }
                DescriptorBinding::SampledTexture { binding, texture } => {
                    let TextureInner::Vulkan(texture) = &texture.inner;
                    DescriptorWrite {
                        binding: *binding,
                        resource: DescriptorResource::SampledTexture(texture),
                    }
                }
                DescriptorBinding::AttachmentTexture {
                    binding,
                    attachment,
                } => {
                    let AttachmentInner::Vulkan(attachment) = &attachment.inner;
                    DescriptorWrite {
                        binding: *binding,
                        resource: DescriptorResource::AttachmentTexture(attachment),
                    }
                }
            })
            .collect();

        let set = backend.create_descriptor_set(shader, set_index, &writes)?;
        Ok(DescriptorSet {
            inner: DescriptorSetInner::Vulkan(set),
        })
    }

    /// Bulk-reclaim descriptor pools. Every descriptor set allocated so
    /// far becomes invalid at once.
    pub fn reset_descriptor_pools(&mut self) -> Result<()> {
        let Backend::Vulkan(backend) = &mut self.backend;
        backend.reset_descriptor_pools()
    }

    /// Block until the device is idle.
    pub fn wait_idle(&self) -> Result<()> {
        let Backend::Vulkan(backend) = &self.backend;
        backend.wait_idle()
    }
}

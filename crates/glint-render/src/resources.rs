//! Frontend resource types.
//!
//! Each resource kind is a closed tagged variant over the backends that
//! can produce it, selected once at renderer initialization. Every
//! resource is exclusively owned by the caller that allocated it and
//! releases its native handles when dropped.

use glint_gpu::error::Result;

/// A vertex buffer.
pub struct VertexBuffer {
    pub(crate) inner: BufferInner,
}

/// An index buffer holding 32-bit indices.
pub struct IndexBuffer {
    pub(crate) inner: BufferInner,
}

/// A uniform buffer, host-visible for per-frame updates.
pub struct UniformBuffer {
    pub(crate) inner: BufferInner,
}

pub(crate) enum BufferInner {
    Vulkan(glint_gpu::GpuBuffer),
}

impl UniformBuffer {
    /// Write raw bytes at an offset.
    ///
    /// The caller must not overwrite data still read by an in-flight
    /// frame; wait for that frame's fence (or double-buffer) first.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let BufferInner::Vulkan(buffer) = &self.inner;
        buffer.write_bytes(offset, data)
    }

    /// Write one plain-old-data value at an offset.
    pub fn write_value<T: bytemuck::Pod>(&self, offset: u64, value: &T) -> Result<()> {
        self.write(offset, bytemuck::bytes_of(value))
    }
}

/// A shader: pipeline state derived from compiled stage binaries.
pub struct Shader {
    pub(crate) inner: ShaderInner,
}

pub(crate) enum ShaderInner {
    Vulkan(glint_gpu::VulkanShader),
}

impl Shader {
    /// Update the shader's viewport after a surface resize. Takes effect
    /// the next time the shader is bound.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        let ShaderInner::Vulkan(shader) = &mut self.inner;
        shader.set_viewport_extent(width, height);
    }
}

/// A sampled texture.
pub struct Texture {
    pub(crate) inner: TextureInner,
}

pub(crate) enum TextureInner {
    Vulkan(glint_gpu::GpuTexture),
}

/// An offscreen attachment image, drawable and sampleable.
pub struct Attachment {
    pub(crate) inner: AttachmentInner,
}

pub(crate) enum AttachmentInner {
    Vulkan(glint_gpu::Attachment),
}

/// A render pass.
pub struct RenderPass {
    pub(crate) inner: RenderPassInner,
}

pub(crate) enum RenderPassInner {
    Vulkan(glint_gpu::RenderPass),
}

/// A render target: concrete attachments a pass draws into.
pub struct RenderTarget {
    pub(crate) inner: RenderTargetInner,
}

pub(crate) enum RenderTargetInner {
    Vulkan(glint_gpu::RenderTarget),
}

/// A descriptor set bound at its shader-reflected set index.
///
/// Invalidated wholesale by [`crate::Renderer::reset_descriptor_pools`];
/// do not bind a set allocated before the last reset.
pub struct DescriptorSet {
    pub(crate) inner: DescriptorSetInner,
}

pub(crate) enum DescriptorSetInner {
    Vulkan(glint_gpu::VulkanDescriptorSet),
}

/// One `{binding, resource}` entry when building a descriptor set.
pub enum DescriptorBinding<'a> {
    UniformBuffer { binding: u32, buffer: &'a UniformBuffer },
    SampledTexture { binding: u32, texture: &'a Texture },
    AttachmentTexture { binding: u32, attachment: &'a Attachment },
}

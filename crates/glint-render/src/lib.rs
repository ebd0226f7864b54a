//! Frontend renderer facade.
//!
//! Application code talks to [`Renderer`] and the resource types in this
//! crate; the graphics API behind them is chosen once at initialization
//! and never leaks through the interface.

pub mod renderer;
pub mod resources;

pub use glint_core::{
    AttachmentConfig, AttachmentUsage, BackendKind, ClearFlags, DepthFlags, DuplicateBindingPolicy,
    LoadOp, RenderPassConfig, RendererConfig, ShaderConfig, ShaderStage, StoreOp, TextureFormat,
    Topology,
};
pub use glint_gpu::error::{GpuError, Result};
pub use renderer::{DrawTarget, PassTarget, Renderer};
pub use resources::{
    Attachment, DescriptorBinding, DescriptorSet, IndexBuffer, RenderPass, RenderTarget, Shader,
    Texture, UniformBuffer, VertexBuffer,
};

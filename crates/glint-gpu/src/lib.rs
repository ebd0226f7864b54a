//! Vulkan backend for the Glint renderer.
//!
//! This crate provides:
//! - Vulkan instance and device management
//! - SPIR-V loading and reflection
//! - Descriptor layout interning and pool recycling
//! - Reflection-driven pipeline creation
//! - Swapchain handling and frame sequencing
//! - Buffer, texture, render pass and render target wrappers

pub mod backend;
pub mod capabilities;
pub mod command;
pub mod context;
mod convert;
pub mod descriptors;
pub mod error;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod reflect;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use backend::{
    DescriptorResource, DescriptorWrite, VulkanBackend, VulkanDescriptorSet, VulkanShader,
};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{DescriptorLayoutCache, DescriptorSetAllocator, LayoutBinding};
pub use error::{GpuError, Result};
pub use frame::{FlightTracker, FrameManager};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{GraphicsPipeline, PipelineConfig};
pub use reflect::{
    reflect, BindingType, PushConstantRange, ReflectError, ReflectedBinding, ReflectedSet,
    ShaderReflection, VertexAttribute,
};
pub use render_pass::{RenderPass, RenderTarget};
pub use shader::ShaderBinary;
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::Swapchain;
pub use sync::{create_fence, create_semaphore, FrameSync};
pub use texture::{Attachment, GpuTexture};

//! Backend-agnostic types for the Glint renderer.
//!
//! This crate provides the types application code uses to talk to the
//! frontend without depending on any graphics API:
//! - Shader stage, topology and format enums
//! - Depth and clear flag masks
//! - Render pass and attachment descriptions
//! - Renderer configuration

pub mod config;
pub mod types;

pub use config::{BackendKind, DuplicateBindingPolicy, RendererConfig};
pub use types::{
    AttachmentConfig, AttachmentUsage, ClearFlags, DepthFlags, LoadOp, RenderPassConfig,
    ShaderConfig, ShaderStage, StoreOp, TextureFormat, Topology,
};

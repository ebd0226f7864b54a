//! GPU error types.

use ash::vk;
use thiserror::Error;

use crate::reflect::ReflectError;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader binary could not be loaded.
    #[error("Shader binary unreadable: {0}")]
    ShaderBinary(String),

    /// Shader reflection failed.
    #[error("Shader reflection failed: {0}")]
    Reflection(#[from] ReflectError),

    /// Shader module creation failed.
    #[error("Shader module creation failed: {0}")]
    ShaderModule(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Descriptor pool exhausted even after grabbing a fresh pool.
    #[error("Descriptor allocation failed after pool retry")]
    DescriptorExhausted,

    /// A fence wait exceeded the configured timeout.
    #[error("Fence wait timed out")]
    FenceTimeout,

    /// The device was lost while waiting or submitting.
    #[error("Device lost")]
    DeviceLost,

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

//! Renderer configuration.

/// Which backend the frontend drives.
///
/// Selected once at initialization; the choice never changes for the
/// lifetime of the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Vulkan,
}

/// What reflection does when two stages declare the same `(set, binding)`
/// with incompatible types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateBindingPolicy {
    /// Keep the first stage's declaration, log a warning, drop the rest.
    #[default]
    WarnAndDrop,
    /// Fail reflection for the whole shader.
    HardFail,
}

/// Renderer configuration.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Enable vsync (FIFO presentation).
    pub vsync: bool,
    /// Enable validation layers (default: debug builds only).
    pub validation: bool,
    /// Timeout for frame fence waits, in nanoseconds.
    pub fence_timeout_ns: u64,
    /// Policy for conflicting duplicate bindings during reflection.
    pub duplicate_binding: DuplicateBindingPolicy,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "Glint".to_string(),
            vsync: true,
            validation: cfg!(debug_assertions),
            fence_timeout_ns: u64::MAX,
            duplicate_binding: DuplicateBindingPolicy::default(),
        }
    }
}

impl RendererConfig {
    /// Create a config with the given application name.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the frame fence wait timeout.
    pub fn with_fence_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }

    /// Set the duplicate-binding policy.
    pub fn with_duplicate_binding(mut self, policy: DuplicateBindingPolicy) -> Self {
        self.duplicate_binding = policy;
        self
    }
}

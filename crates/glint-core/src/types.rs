//! Shared renderer types.

use bitflags::bitflags;

/// Shader pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    TessellationControl,
    TessellationEvaluation,
}

impl ShaderStage {
    /// Conventional file suffix for a compiled stage binary.
    pub fn file_suffix(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Geometry => "geom",
            Self::TessellationControl => "tesc",
            Self::TessellationEvaluation => "tese",
        }
    }
}

/// Primitive topology for a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    #[default]
    TriangleList,
    LineList,
    PatchList,
}

bitflags! {
    /// Depth behavior requested for a pipeline.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DepthFlags: u32 {
        /// Enable depth testing.
        const TEST = 1 << 0;
        /// Enable depth writes.
        const WRITE = 1 << 1;
    }
}

impl Default for DepthFlags {
    fn default() -> Self {
        Self::TEST | Self::WRITE
    }
}

bitflags! {
    /// Which aspects a render pass clears on begin.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClearFlags: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// Texture and attachment formats exposed by the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    D32Sfloat,
    D24UnormS8Uint,
}

impl TextureFormat {
    /// Whether this format carries depth (and possibly stencil) data.
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32Sfloat | Self::D24UnormS8Uint)
    }

    /// Bytes per pixel for color formats (depth formats are never uploaded).
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Rgba8Srgb | Self::Bgra8Unorm | Self::Bgra8Srgb => 4,
            Self::D32Sfloat | Self::D24UnormS8Uint => 4,
        }
    }
}

/// What an attachment is rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentUsage {
    Color,
    DepthStencil,
}

/// How an attachment's previous contents are treated at pass begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadOp {
    #[default]
    DontCare,
    Load,
}

/// Whether an attachment's contents survive pass end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOp {
    #[default]
    DontCare,
    Store,
}

/// One attachment of a render pass.
#[derive(Debug, Clone)]
pub struct AttachmentConfig {
    pub format: TextureFormat,
    pub usage: AttachmentUsage,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    /// Transition to a presentable layout after the pass.
    pub present_after: bool,
}

/// Full description of a render pass.
#[derive(Debug, Clone)]
pub struct RenderPassConfig {
    /// Attachments in binding order. Clear values index into this list.
    pub attachments: Vec<AttachmentConfig>,
    /// Render area offset and extent: `(x, y, width, height)`.
    pub render_area: (i32, i32, u32, u32),
    /// Clear color applied to color attachments when `ClearFlags::COLOR` is set.
    pub clear_color: [f32; 4],
    /// Clear depth applied when `ClearFlags::DEPTH` is set.
    pub clear_depth: f32,
    /// Clear stencil applied when `ClearFlags::STENCIL` is set.
    pub clear_stencil: u32,
    pub clear_flags: ClearFlags,
}

impl RenderPassConfig {
    /// A single color + depth pass covering the given extent.
    pub fn standard(width: u32, height: u32, color_format: TextureFormat) -> Self {
        Self {
            attachments: vec![
                AttachmentConfig {
                    format: color_format,
                    usage: AttachmentUsage::Color,
                    load_op: LoadOp::DontCare,
                    store_op: StoreOp::Store,
                    present_after: true,
                },
                AttachmentConfig {
                    format: TextureFormat::D32Sfloat,
                    usage: AttachmentUsage::DepthStencil,
                    load_op: LoadOp::DontCare,
                    store_op: StoreOp::DontCare,
                    present_after: false,
                },
            ],
            render_area: (0, 0, width, height),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
            clear_stencil: 0,
            clear_flags: ClearFlags::COLOR | ClearFlags::DEPTH,
        }
    }
}

/// Everything needed to build a shader pipeline, minus the render pass it
/// targets. Stage binaries are pre-compiled; layouts come from reflection.
#[derive(Debug, Clone)]
pub struct ShaderConfig {
    /// Ordered `(stage, path to compiled binary)` pairs.
    pub stages: Vec<(ShaderStage, std::path::PathBuf)>,
    pub topology: Topology,
    pub depth: DepthFlags,
    /// Viewport extent the pipeline renders at.
    pub viewport_width: u32,
    pub viewport_height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_flags_default_tests_and_writes() {
        let flags = DepthFlags::default();
        assert!(flags.contains(DepthFlags::TEST));
        assert!(flags.contains(DepthFlags::WRITE));
    }

    #[test]
    fn stage_file_suffixes() {
        assert_eq!(ShaderStage::Vertex.file_suffix(), "vert");
        assert_eq!(ShaderStage::TessellationEvaluation.file_suffix(), "tese");
    }

    #[test]
    fn depth_formats_identified() {
        assert!(TextureFormat::D32Sfloat.is_depth());
        assert!(TextureFormat::D24UnormS8Uint.is_depth());
        assert!(!TextureFormat::Bgra8Srgb.is_depth());
    }

    #[test]
    fn standard_pass_shape() {
        let config = RenderPassConfig::standard(1280, 720, TextureFormat::Bgra8Srgb);
        assert_eq!(config.attachments.len(), 2);
        assert!(config.attachments[0].present_after);
        assert_eq!(config.attachments[1].usage, AttachmentUsage::DepthStencil);
        assert_eq!(config.render_area, (0, 0, 1280, 720));
    }
}

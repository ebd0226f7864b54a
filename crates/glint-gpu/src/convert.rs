//! Frontend-type to Vulkan conversions.

use ash::vk;
use glint_core::{LoadOp, StoreOp, TextureFormat};

/// Map a frontend format to its Vulkan format.
pub fn format_to_vk(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::D32Sfloat => vk::Format::D32_SFLOAT,
        TextureFormat::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
    }
}

/// Map a Vulkan format back to the frontend format, where one exists.
pub fn format_from_vk(format: vk::Format) -> Option<TextureFormat> {
    match format {
        vk::Format::R8G8B8A8_UNORM => Some(TextureFormat::Rgba8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(TextureFormat::Rgba8Srgb),
        vk::Format::B8G8R8A8_UNORM => Some(TextureFormat::Bgra8Unorm),
        vk::Format::B8G8R8A8_SRGB => Some(TextureFormat::Bgra8Srgb),
        vk::Format::D32_SFLOAT => Some(TextureFormat::D32Sfloat),
        vk::Format::D24_UNORM_S8_UINT => Some(TextureFormat::D24UnormS8Uint),
        _ => None,
    }
}

/// Map a load op, honoring a clear request for the attachment's aspect.
pub fn load_op_to_vk(op: LoadOp, clear: bool) -> vk::AttachmentLoadOp {
    if clear {
        return vk::AttachmentLoadOp::CLEAR;
    }
    match op {
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
    }
}

/// Map a store op.
pub fn store_op_to_vk(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_request_overrides_load_op() {
        assert_eq!(
            load_op_to_vk(LoadOp::DontCare, true),
            vk::AttachmentLoadOp::CLEAR
        );
        assert_eq!(load_op_to_vk(LoadOp::Load, true), vk::AttachmentLoadOp::CLEAR);
        assert_eq!(load_op_to_vk(LoadOp::Load, false), vk::AttachmentLoadOp::LOAD);
        assert_eq!(
            load_op_to_vk(LoadOp::DontCare, false),
            vk::AttachmentLoadOp::DONT_CARE
        );
    }

    #[test]
    fn depth_formats_map_to_depth_vk_formats() {
        assert_eq!(format_to_vk(TextureFormat::D32Sfloat), vk::Format::D32_SFLOAT);
        assert_eq!(format_to_vk(TextureFormat::Bgra8Srgb), vk::Format::B8G8R8A8_SRGB);
    }
}

//! Sampled textures and offscreen attachments.

use ash::vk;
use glint_core::TextureFormat;
use gpu_allocator::MemoryLocation;

use crate::command::{execute_single_time_commands, CommandPool};
use crate::context::GpuContext;
use crate::convert::format_to_vk;
use crate::error::{GpuError, Result};
use crate::memory::GpuImage;

/// A sampled 2D texture: image, view and sampler.
///
/// Pixel data is uploaded through a staging buffer on creation; the image
/// lives in device-local memory afterwards.
pub struct GpuTexture {
    image: GpuImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
    device: ash::Device,
}

impl GpuTexture {
    /// Create a texture and upload its pixels.
    ///
    /// `pixels` must be tightly packed `width * height` texels in `format`.
    ///
    /// # Safety
    /// The context and command pool must be valid.
    pub unsafe fn new(
        gpu: &GpuContext,
        pool: &CommandPool,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: &[u8],
    ) -> Result<Self> {
        if format.is_depth() {
            return Err(GpuError::InvalidState(
                "depth formats cannot be used for sampled textures".to_string(),
            ));
        }
        let expected = (width as u64) * (height as u64) * u64::from(format.bytes_per_pixel());
        if pixels.len() as u64 != expected {
            return Err(GpuError::InvalidState(format!(
                "texture data is {} bytes, expected {expected}",
                pixels.len()
            )));
        }

        let device = gpu.device();
        let vk_format = format_to_vk(format);

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image =
            gpu.allocator()
                .create_image(&image_info, MemoryLocation::GpuOnly, "texture")?;

        // Stage and copy. The staging buffer is freed when it drops at the
        // end of this scope, after the blocking single-time submit.
        let staging = gpu.allocator().create_buffer(
            expected,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "texture_staging",
        )?;
        staging.write_bytes(0, pixels)?;

        let subresource_range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);

        execute_single_time_commands(device, pool, gpu.graphics_queue(), |cmd| {
            let to_transfer = vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.handle())
                .subresource_range(subresource_range);

            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );

            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                });

            device.cmd_copy_buffer_to_image(
                cmd,
                staging.handle(),
                image.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            let to_sampled = vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.handle())
                .subresource_range(subresource_range);

            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_sampled],
            );
        })?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.handle())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk_format)
            .subresource_range(subresource_range);
        let view = device.create_image_view(&view_info, None)?;

        let anisotropy = gpu.capabilities().supports_sampler_anisotropy;
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy { 16.0 } else { 1.0 });
        let sampler = match device.create_sampler(&sampler_info, None) {
            Ok(sampler) => sampler,
            Err(e) => {
                device.destroy_image_view(view, None);
                return Err(GpuError::from(e));
            }
        };

        Ok(Self {
            image,
            view,
            sampler,
            device: device.clone(),
        })
    }

    /// Get the image view handle.
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Get the sampler handle.
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Image extent.
    pub fn extent(&self) -> vk::Extent3D {
        self.image.extent()
    }
}

impl Drop for GpuTexture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.view, None);
        }
    }
}

/// An offscreen render-target image: color or depth, also sampleable so a
/// later pass can read what an earlier pass wrote.
pub struct Attachment {
    image: GpuImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
    format: TextureFormat,
    device: ash::Device,
}

impl Attachment {
    /// Create an attachment image of the given format.
    ///
    /// # Safety
    /// The context must be valid.
    pub unsafe fn new(
        gpu: &GpuContext,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Self> {
        let device = gpu.device();
        let vk_format = format_to_vk(format);
        let is_depth = format.is_depth();

        let usage = if is_depth {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image =
            gpu.allocator()
                .create_image(&image_info, MemoryLocation::GpuOnly, "attachment")?;

        let aspect = if is_depth {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.handle())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk_format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        let view = device.create_image_view(&view_info, None)?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
        let sampler = match device.create_sampler(&sampler_info, None) {
            Ok(sampler) => sampler,
            Err(e) => {
                device.destroy_image_view(view, None);
                return Err(GpuError::from(e));
            }
        };

        Ok(Self {
            image,
            view,
            sampler,
            format,
            device: device.clone(),
        })
    }

    /// Get the image view handle.
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Get the sampler handle used when binding as a texture.
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Attachment format.
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Image extent.
    pub fn extent(&self) -> vk::Extent3D {
        self.image.extent()
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.view, None);
        }
    }
}

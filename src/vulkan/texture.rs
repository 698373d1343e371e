use std::path::Path;
use std::ptr::copy_nonoverlapping;

use anyhow::{Context as _, Result, anyhow};
use vulkanalia::prelude::v1_3::*;

use crate::config::ATLAS_FORMAT;
use crate::vulkan::Context;
use crate::vulkan::resources;

/// The sampled sprite atlas.
#[derive(Debug, Default)]
pub struct Texture {
    pub image: vk::Image,
    pub image_memory: vk::DeviceMemory,
    pub image_view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    /// Decodes `path` to RGBA8 and uploads it.
    pub unsafe fn load(context: &Context, path: &Path) -> Result<Self> {
        let img = image::open(path)
            .with_context(|| format!("Failed to open texture atlas `{}`", path.display()))?
            .to_rgba8();
        Self::from_rgba(context, img.width(), img.height(), img.as_raw())
    }

    pub unsafe fn from_rgba(context: &Context, width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected || expected == 0 {
            return Err(anyhow!(
                "Atlas pixel data is {} bytes, expected {} for {}x{} RGBA8.",
                pixels.len(),
                expected,
                width,
                height
            ));
        }

        let mut texture = Self {
            width,
            height,
            ..Default::default()
        };
        if let Err(error) = texture.upload(context, pixels) {
            texture.destroy(&context.device);
            return Err(error);
        }

        log::debug!("Uploaded {}x{} texture atlas.", width, height);
        Ok(texture)
    }

    unsafe fn upload(&mut self, context: &Context, pixels: &[u8]) -> Result<()> {
        let device = &context.device;
        let size = pixels.len() as vk::DeviceSize;

        let (staging_buffer, staging_memory) = resources::create_staging_buffer(context, size)?;
        let staged = (|| -> Result<()> {
            let memory = device.map_memory(staging_memory, 0, size, vk::MemoryMapFlags::empty())?;
            copy_nonoverlapping(pixels.as_ptr(), memory.cast(), pixels.len());
            device.unmap_memory(staging_memory);

            let (image, memory) = resources::create_image(
                context,
                self.width,
                self.height,
                ATLAS_FORMAT,
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            )?;
            self.image = image;
            self.image_memory = memory;

            resources::transition_image_layout(
                context,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            resources::copy_buffer_to_image(context, staging_buffer, image, self.width, self.height)?;
            resources::transition_image_layout(
                context,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })();
        resources::destroy_buffer(device, staging_buffer, staging_memory);
        staged?;

        self.image_view =
            resources::create_image_view(device, self.image, ATLAS_FORMAT, vk::ImageAspectFlags::COLOR)?;

        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(false)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);
        self.sampler = device.create_sampler(&info, None)?;

        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        device.destroy_sampler(self.sampler, None);
        device.destroy_image_view(self.image_view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.image_memory, None);
        *self = Self::default();
    }
}

use anyhow::{Result, anyhow};
use vulkanalia::prelude::v1_3::*;
use vulkanalia::vk::KhrSwapchainExtension;

use crate::config::{DEPTH_FORMAT, MAX_SWAPCHAIN_IMAGE_COUNT};
use crate::error::Error;
use crate::vulkan::Context;
use crate::vulkan::device::SwapchainSupport;
use crate::vulkan::resources;

/// Presentable images plus everything derived from them. Rebuilt as a unit.
#[derive(Debug, Default)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub depth_image: vk::Image,
    pub depth_image_memory: vk::DeviceMemory,
    pub depth_image_view: vk::ImageView,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    pub unsafe fn create(&mut self, context: &Context, size: (u32, u32)) -> Result<()> {
        let indices = &context.queue_families;
        let support =
            SwapchainSupport::get(&context.instance, context.surface, context.physical_device)?;

        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| anyhow!("Insufficient swapchain support."))?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, size);
        let image_count = choose_image_count(&support.capabilities);

        let mut queue_family_indices = vec![];
        let image_sharing_mode = if indices.graphics != indices.present {
            queue_family_indices.push(indices.graphics);
            queue_family_indices.push(indices.present);
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(image_sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        self.handle = context.device.create_swapchain_khr(&info, None)?;
        self.format = surface_format.format;
        self.extent = extent;
        self.images = context.device.get_swapchain_images_khr(self.handle)?;

        if self.images.len() > MAX_SWAPCHAIN_IMAGE_COUNT {
            return Err(Error::TooManySwapchainImages {
                count: self.images.len(),
                max: MAX_SWAPCHAIN_IMAGE_COUNT,
            }
            .into());
        }

        log::info!(
            "Swapchain created: {} images, {:?}, {}x{}, {:?}.",
            self.images.len(),
            self.format,
            extent.width,
            extent.height,
            present_mode
        );

        Ok(())
    }

    pub unsafe fn create_image_views(&mut self, device: &Device) -> Result<()> {
        for image in &self.images {
            let view =
                resources::create_image_view(device, *image, self.format, vk::ImageAspectFlags::COLOR)?;
            self.image_views.push(view);
        }
        Ok(())
    }

    pub unsafe fn create_depth_resources(&mut self, context: &Context) -> Result<()> {
        let (image, memory) = resources::create_image(
            context,
            self.extent.width,
            self.extent.height,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        self.depth_image = image;
        self.depth_image_memory = memory;

        self.depth_image_view = resources::create_image_view(
            &context.device,
            image,
            DEPTH_FORMAT,
            vk::ImageAspectFlags::DEPTH,
        )?;

        resources::transition_image_layout(
            context,
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
    }

    pub unsafe fn create_framebuffers(
        &mut self,
        device: &Device,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        for view in &self.image_views {
            let attachments = &[*view, self.depth_image_view];
            let info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            self.framebuffers.push(device.create_framebuffer(&info, None)?);
        }
        Ok(())
    }

    /// Tears down in dependency order and leaves `self` empty. Safe to call
    /// on a partially built swapchain.
    pub unsafe fn cleanup(&mut self, device: &Device) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer, None);
        }

        device.destroy_image_view(self.depth_image_view, None);
        device.destroy_image(self.depth_image, None);
        device.free_memory(self.depth_image_memory, None);

        for view in self.image_views.drain(..) {
            device.destroy_image_view(view, None);
        }

        device.destroy_swapchain_khr(self.handle, None);

        *self = Self::default();
    }

    /// Builds the full chain for a render pass that already exists.
    pub unsafe fn build(
        &mut self,
        context: &Context,
        render_pass: vk::RenderPass,
        size: (u32, u32),
    ) -> Result<()> {
        self.create(context, size)?;
        self.create_image_views(&context.device)?;
        self.create_depth_resources(context)?;
        self.create_framebuffers(&context.device, render_pass)
    }

    pub unsafe fn recreate(
        &mut self,
        context: &Context,
        render_pass: vk::RenderPass,
        size: (u32, u32),
    ) -> Result<()> {
        context.device.device_wait_idle()?;
        self.cleanup(&context.device);
        self.build(context, render_pass, size)
    }
}

/// Prefers an sRGB format in the sRGB color space, else the first offered.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            matches!(
                f.format,
                vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB
            ) && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|m| *m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Uses the surface's fixed extent unless it reports the `u32::MAX`
/// sentinel, in which case `size` is clamped into the allowed range.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, size: (u32, u32)) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        let (width, height) = size;
        let clamp = |min: u32, max: u32, v: u32| min.max(max.min(v));
        vk::Extent2D::builder()
            .width(clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
                width,
            ))
            .height(clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
                height,
            ))
            .build()
    }
}

/// One more than the minimum, capped by the surface maximum (0 means none)
/// and by [`MAX_SWAPCHAIN_IMAGE_COUNT`]. Never below the surface minimum.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 {
        image_count = image_count.min(capabilities.max_image_count);
    }
    image_count
        .min(MAX_SWAPCHAIN_IMAGE_COUNT as u32)
        .max(capabilities.min_image_count)
}

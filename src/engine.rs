use std::sync::Arc;

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vulkanalia::prelude::v1_3::*;
use vulkanalia::vk::KhrSwapchainExtension;

use crate::camera::Camera;
use crate::config::{CLEAR_COLOR, CLEAR_DEPTH, EngineConfig, FramebufferSizeFn, MAX_FRAMES_IN_FLIGHT};
use crate::error::Error;
use crate::vulkan::Context;
use crate::vulkan::frame::{CameraBuffers, Descriptors, FrameCursor, FrameSync};
use crate::vulkan::pipeline;
use crate::vulkan::swapchain::Swapchain;
use crate::vulkan::texture::Texture;

/// Outcome of [`Engine::begin_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame is open; draw into it and call [`Engine::end_frame`].
    Recording,
    /// The swapchain was stale (or the window has no area). Nothing was
    /// recorded and `end_frame` must not be called.
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwapchainInfo {
    pub image_count: usize,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Owns the presentation pipeline and paces frames.
pub struct Engine {
    context: Arc<Context>,
    framebuffer_size: FramebufferSizeFn,
    swapchain: Swapchain,
    swapchain_stale: bool,
    render_pass: vk::RenderPass,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    texture: Texture,
    camera: Camera,
    camera_buffers: CameraBuffers,
    descriptors: Descriptors,
    command_buffers: Vec<vk::CommandBuffer>,
    sync: FrameSync,
    cursor: FrameCursor,
}

impl Engine {
    /// Brings up the device, swapchain and pipeline. On failure everything
    /// created so far is destroyed before the error is returned.
    ///
    /// # Safety
    ///
    /// `config.window` must outlive the engine and every sprite batch
    /// created from it.
    pub unsafe fn create<W>(config: EngineConfig<'_, W>) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let context = Context::create(config.window, &config.app_info, config.validation)?;

        let EngineConfig {
            framebuffer_size,
            vertex_shader,
            fragment_shader,
            atlas,
            ..
        } = config;

        let mut engine = Self {
            context,
            framebuffer_size,
            swapchain: Swapchain::default(),
            swapchain_stale: false,
            render_pass: vk::RenderPass::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            texture: Texture::default(),
            camera: Camera::default(),
            camera_buffers: CameraBuffers::default(),
            descriptors: Descriptors::default(),
            command_buffers: Vec::new(),
            sync: FrameSync::default(),
            cursor: FrameCursor::default(),
        };

        // Dropping a partially initialised engine releases whatever exists.
        engine
            .init(&vertex_shader, &fragment_shader, &atlas)
            .inspect_err(|error| log::error!("Engine creation failed, rolling back: {error:#}"))?;

        Ok(engine)
    }

    unsafe fn init(
        &mut self,
        vertex_shader: &std::path::Path,
        fragment_shader: &std::path::Path,
        atlas: &std::path::Path,
    ) -> Result<()> {
        let context = self.context.clone();
        let device = &context.device;

        self.swapchain.create(&context, (self.framebuffer_size)())?;
        self.swapchain.create_image_views(device)?;
        self.render_pass = pipeline::create_render_pass(device, self.swapchain.format)?;
        self.camera_buffers.create(&context, self.camera.uniform())?;
        self.texture = Texture::load(&context, atlas)?;
        self.swapchain.create_depth_resources(&context)?;
        self.descriptor_set_layout = pipeline::create_descriptor_set_layout(device)?;
        self.descriptors.create(
            device,
            self.descriptor_set_layout,
            &self.camera_buffers,
            &self.texture,
        )?;
        self.pipeline_layout = pipeline::create_pipeline_layout(device, self.descriptor_set_layout)?;
        self.pipeline = pipeline::create_pipeline(
            device,
            self.render_pass,
            self.pipeline_layout,
            vertex_shader,
            fragment_shader,
        )?;
        self.swapchain.create_framebuffers(device, self.render_pass)?;

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(context.general_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(MAX_FRAMES_IN_FLIGHT as u32);
        self.command_buffers = device.allocate_command_buffers(&allocate_info)?;

        self.sync.create(device)?;

        log::info!("Engine created.");
        Ok(())
    }

    /// Waits for the current slot, acquires an image and opens the render
    /// pass with the pipeline, viewport and camera bound.
    pub unsafe fn begin_frame(&mut self) -> Result<FrameStatus> {
        if self.cursor.is_open() {
            return Err(Error::FrameAlreadyOpen.into());
        }

        if self.swapchain_stale {
            self.recreate_swapchain()?;
            if self.swapchain_stale {
                return Ok(FrameStatus::Skipped);
            }
        }

        let slot = self.cursor.current();
        let in_flight_fence = self.sync.in_flight[slot];

        self.context
            .device
            .wait_for_fences(&[in_flight_fence], true, u64::MAX)?;

        let result = self.context.device.acquire_next_image_khr(
            self.swapchain.handle,
            u64::MAX,
            self.sync.image_available[slot],
            vk::Fence::null(),
        );

        let image_index = match result {
            Ok((image_index, _)) => image_index,
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
                self.recreate_swapchain()?;
                return Ok(FrameStatus::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        // Only reset once work is certain to be submitted, or the next wait
        // on this slot would never return.
        self.context.device.reset_fences(&[in_flight_fence])?;

        let command_buffer = self.command_buffers[slot];
        self.context
            .device
            .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
        self.record_frame_start(slot, command_buffer, image_index)?;

        self.camera_buffers.write(slot, self.camera.uniform());
        self.cursor.open(image_index)?;

        Ok(FrameStatus::Recording)
    }

    unsafe fn record_frame_start(
        &self,
        slot: usize,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> Result<()> {
        let device = &self.context.device;
        let extent = self.swapchain.extent;

        let info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(command_buffer, &info)?;

        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(extent);

        let color_clear_value = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: CLEAR_COLOR,
            },
        };
        let depth_clear_value = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: CLEAR_DEPTH,
                stencil: 0,
            },
        };

        let clear_values = &[color_clear_value, depth_clear_value];
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.swapchain.framebuffers[image_index as usize])
            .render_area(render_area)
            .clear_values(clear_values);

        device.cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline);

        let viewport = vk::Viewport::builder()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        device.cmd_set_viewport(command_buffer, 0, &[viewport]);

        let scissor = vk::Rect2D::builder()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(extent);
        device.cmd_set_scissor(command_buffer, 0, &[scissor]);

        device.cmd_bind_descriptor_sets(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline_layout,
            0,
            &[self.descriptors.sets[slot]],
            &[],
        );

        Ok(())
    }

    /// Ends recording, submits, presents and moves to the next slot.
    pub unsafe fn end_frame(&mut self) -> Result<()> {
        let image_index = self.cursor.close()?;
        let slot = self.cursor.current();
        let device = &self.context.device;
        let command_buffer = self.command_buffers[slot];

        device.cmd_end_render_pass(command_buffer);
        device.end_command_buffer(command_buffer)?;

        let wait_semaphores = &[self.sync.image_available[slot]];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[command_buffer];
        let signal_semaphores = &[self.sync.render_finished[slot]];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        device.queue_submit(
            self.context.graphics_queue,
            &[submit_info],
            self.sync.in_flight[slot],
        )?;

        let swapchains = &[self.swapchain.handle];
        let image_indices = &[image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(signal_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        let result = device.queue_present_khr(self.context.present_queue, &present_info);
        self.cursor.advance();

        let changed = result == Ok(vk::SuccessCode::SUBOPTIMAL_KHR)
            || result == Err(vk::ErrorCode::OUT_OF_DATE_KHR);
        if changed {
            self.recreate_swapchain()?;
        } else if let Err(e) = result {
            return Err(e.into());
        }

        Ok(())
    }

    /// Rebuilds the swapchain at the current framebuffer size. A zero-area
    /// framebuffer postpones the rebuild until the next `begin_frame`.
    pub unsafe fn recreate_swapchain(&mut self) -> Result<()> {
        if self.cursor.is_open() {
            return Err(Error::FrameAlreadyOpen.into());
        }

        let (width, height) = (self.framebuffer_size)();
        if width == 0 || height == 0 {
            log::debug!("Framebuffer has no area, postponing swapchain recreation.");
            self.swapchain_stale = true;
            return Ok(());
        }

        self.swapchain
            .recreate(&self.context, self.render_pass, (width, height))?;
        self.swapchain_stale = false;
        Ok(())
    }

    /// Schedules a swapchain rebuild for the next `begin_frame`, for window
    /// systems that do not report staleness on resize.
    pub fn notify_resized(&mut self) {
        self.swapchain_stale = true;
    }

    pub fn swapchain_info(&self) -> SwapchainInfo {
        SwapchainInfo {
            image_count: self.swapchain.images.len(),
            format: self.swapchain.format,
            extent: self.swapchain.extent,
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Changes apply from the next `begin_frame`.
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn is_frame_open(&self) -> bool {
        self.cursor.is_open()
    }

    /// Device-level handles shared with every batch created from this engine.
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// The command buffer of the open frame.
    pub(crate) fn recording_command_buffer(&self) -> Result<vk::CommandBuffer> {
        if self.cursor.is_open() {
            Ok(self.command_buffers[self.cursor.current()])
        } else {
            Err(Error::NoOpenFrame.into())
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let context = self.context.clone();
        let device = &context.device;
        unsafe {
            if let Err(error) = device.device_wait_idle() {
                log::warn!("Failed to wait for device idle during teardown: {error}");
            }

            self.sync.destroy(device);
            if !self.command_buffers.is_empty() {
                device.free_command_buffers(context.general_pool, &self.command_buffers);
                self.command_buffers.clear();
            }
            self.swapchain.cleanup(device);
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.descriptors.destroy(device);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            self.texture.destroy(device);
            self.camera_buffers.destroy(device);
            device.destroy_render_pass(self.render_pass, None);
        }
        log::debug!("Engine destroyed.");
    }
}

//! Per-slot state for frames in flight.

use std::mem::size_of;

use anyhow::Result;
use vulkanalia::prelude::v1_3::*;

use crate::camera::CameraUniform;
use crate::config::MAX_FRAMES_IN_FLIGHT;
use crate::error::Error;
use crate::vulkan::Context;
use crate::vulkan::resources;
use crate::vulkan::texture::Texture;

/// Which in-flight slot is current, and which swapchain image the open
/// frame (if any) renders to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCursor {
    current: usize,
    open_image: Option<u32>,
}

impl FrameCursor {
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn open_image(&self) -> Option<u32> {
        self.open_image
    }

    pub fn is_open(&self) -> bool {
        self.open_image.is_some()
    }

    pub fn open(&mut self, image_index: u32) -> Result<()> {
        if self.is_open() {
            return Err(Error::FrameAlreadyOpen.into());
        }
        self.open_image = Some(image_index);
        Ok(())
    }

    /// Closes the open frame, returning its image index.
    pub fn close(&mut self) -> Result<u32> {
        self.open_image.take().ok_or_else(|| Error::NoOpenFrame.into())
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % MAX_FRAMES_IN_FLIGHT;
    }
}

/// Semaphores and fences, one of each kind per in-flight slot.
#[derive(Debug, Default)]
pub struct FrameSync {
    pub image_available: Vec<vk::Semaphore>,
    pub render_finished: Vec<vk::Semaphore>,
    pub in_flight: Vec<vk::Fence>,
}

impl FrameSync {
    pub unsafe fn create(&mut self, device: &Device) -> Result<()> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Signaled so the first wait on each slot returns immediately.
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            self.image_available
                .push(device.create_semaphore(&semaphore_info, None)?);
            self.render_finished
                .push(device.create_semaphore(&semaphore_info, None)?);
            self.in_flight.push(device.create_fence(&fence_info, None)?);
        }

        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        for semaphore in self.image_available.drain(..) {
            device.destroy_semaphore(semaphore, None);
        }
        for semaphore in self.render_finished.drain(..) {
            device.destroy_semaphore(semaphore, None);
        }
        for fence in self.in_flight.drain(..) {
            device.destroy_fence(fence, None);
        }
    }
}

/// One persistently mapped, host-coherent camera uniform per slot.
#[derive(Debug, Default)]
pub struct CameraBuffers {
    pub buffers: Vec<vk::Buffer>,
    memories: Vec<vk::DeviceMemory>,
    mapped: Vec<*mut CameraUniform>,
}

impl CameraBuffers {
    pub unsafe fn create(&mut self, context: &Context, initial: CameraUniform) -> Result<()> {
        let size = size_of::<CameraUniform>() as vk::DeviceSize;

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let (buffer, memory) = resources::create_buffer(
                context,
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            self.buffers.push(buffer);
            self.memories.push(memory);

            let mapped = context
                .device
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())?
                .cast::<CameraUniform>();
            mapped.write(initial);
            self.mapped.push(mapped);
        }

        Ok(())
    }

    /// The slot's previous frame must have completed.
    pub unsafe fn write(&self, slot: usize, uniform: CameraUniform) {
        self.mapped[slot].write(uniform);
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        for (index, memory) in self.memories.iter().enumerate() {
            if index < self.mapped.len() {
                device.unmap_memory(*memory);
            }
        }
        for (buffer, memory) in self.buffers.drain(..).zip(self.memories.drain(..)) {
            resources::destroy_buffer(device, buffer, memory);
        }
        self.mapped.clear();
    }
}

/// Descriptor pool plus one set per slot, each pointing at that slot's
/// camera buffer and the shared atlas.
#[derive(Debug, Default)]
pub struct Descriptors {
    pub pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
}

impl Descriptors {
    pub unsafe fn create(
        &mut self,
        device: &Device,
        layout: vk::DescriptorSetLayout,
        camera_buffers: &CameraBuffers,
        texture: &Texture,
    ) -> Result<()> {
        let count = MAX_FRAMES_IN_FLIGHT as u32;
        let pool_sizes = &[
            vk::DescriptorPoolSize::builder()
                .type_(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(count)
                .build(),
            vk::DescriptorPoolSize::builder()
                .type_(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(count)
                .build(),
        ];
        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(pool_sizes)
            .max_sets(count);
        self.pool = device.create_descriptor_pool(&info, None)?;

        let layouts = vec![layout; MAX_FRAMES_IN_FLIGHT];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        self.sets = device.allocate_descriptor_sets(&info)?;

        for (set, buffer) in self.sets.iter().zip(&camera_buffers.buffers) {
            let buffer_info = vk::DescriptorBufferInfo::builder()
                .buffer(*buffer)
                .offset(0)
                .range(size_of::<CameraUniform>() as vk::DeviceSize);
            let image_info = vk::DescriptorImageInfo::builder()
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .image_view(texture.image_view)
                .sampler(texture.sampler);

            let buffer_infos = &[buffer_info];
            let camera_write = vk::WriteDescriptorSet::builder()
                .dst_set(*set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(buffer_infos);

            let image_infos = &[image_info];
            let atlas_write = vk::WriteDescriptorSet::builder()
                .dst_set(*set)
                .dst_binding(1)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(image_infos);

            device.update_descriptor_sets(
                &[camera_write, atlas_write],
                &[] as &[vk::CopyDescriptorSet],
            );
        }

        Ok(())
    }

    /// Sets are freed with the pool.
    pub unsafe fn destroy(&mut self, device: &Device) {
        device.destroy_descriptor_pool(self.pool, None);
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_cycles_through_slots() {
        let mut cursor = FrameCursor::default();
        let mut seen = Vec::new();
        for image in 0..5 {
            seen.push(cursor.current());
            cursor.open(image).unwrap();
            assert_eq!(cursor.close().unwrap(), image);
            cursor.advance();
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn only_one_frame_may_be_open() {
        let mut cursor = FrameCursor::default();
        cursor.open(2).unwrap();
        let error = cursor.open(3).unwrap_err();
        assert_eq!(error.downcast_ref::<Error>(), Some(&Error::FrameAlreadyOpen));
        assert_eq!(cursor.open_image(), Some(2));
    }

    #[test]
    fn closing_without_open_frame_fails() {
        let mut cursor = FrameCursor::default();
        let error = cursor.close().unwrap_err();
        assert_eq!(error.downcast_ref::<Error>(), Some(&Error::NoOpenFrame));
    }
}

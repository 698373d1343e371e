//! Buffer and image helpers plus the blocking one-time command primitive
//! every bulk upload goes through.

use std::ptr::copy_nonoverlapping;

use anyhow::{Result, anyhow};
use vulkanalia::prelude::v1_3::*;

use crate::error::Error;
use crate::vulkan::Context;

/// First memory type allowed by `type_bits` whose flags contain `properties`.
pub fn select_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..memory.memory_type_count)
        .find(|i| {
            let suitable = (type_bits & (1 << i)) != 0;
            let memory_type = memory.memory_types[*i as usize];
            suitable && memory_type.property_flags.contains(properties)
        })
        .ok_or_else(|| Error::NoSuitableMemoryType.into())
}

unsafe fn allocate_memory(
    context: &Context,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type = select_memory_type(
        &context.memory_properties,
        requirements.memory_type_bits,
        properties,
    )?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);

    Ok(context.device.allocate_memory(&alloc_info, None)?)
}

/// Creates a buffer and binds freshly allocated memory to it. Nothing is
/// left behind on failure.
pub unsafe fn create_buffer(
    context: &Context,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let device = &context.device;
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(context.sharing.mode)
        .queue_family_indices(&context.sharing.queue_families);

    let buffer = device.create_buffer(&buffer_info, None)?;

    let requirements = device.get_buffer_memory_requirements(buffer);
    let memory = allocate_memory(context, requirements, properties)
        .inspect_err(|_| device.destroy_buffer(buffer, None))?;

    if let Err(error) = device.bind_buffer_memory(buffer, memory, 0) {
        device.free_memory(memory, None);
        device.destroy_buffer(buffer, None);
        return Err(error.into());
    }

    Ok((buffer, memory))
}

pub unsafe fn destroy_buffer(device: &Device, buffer: vk::Buffer, memory: vk::DeviceMemory) {
    device.destroy_buffer(buffer, None);
    device.free_memory(memory, None);
}

/// Host-visible, host-coherent transfer source.
pub unsafe fn create_staging_buffer(
    context: &Context,
    size: vk::DeviceSize,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    create_buffer(
        context,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
}

/// Device-local 2D image with optimal tiling.
pub unsafe fn create_image(
    context: &Context,
    width: u32,
    height: u32,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
) -> Result<(vk::Image, vk::DeviceMemory)> {
    let device = &context.device;
    let info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::_2D)
        .extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .format(format)
        .tiling(vk::ImageTiling::OPTIMAL)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .usage(usage)
        .sharing_mode(context.sharing.mode)
        .queue_family_indices(&context.sharing.queue_families)
        .samples(vk::SampleCountFlags::_1);

    let image = device.create_image(&info, None)?;

    let requirements = device.get_image_memory_requirements(image);
    let memory = allocate_memory(context, requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)
        .inspect_err(|_| device.destroy_image(image, None))?;

    if let Err(error) = device.bind_image_memory(image, memory, 0) {
        device.free_memory(memory, None);
        device.destroy_image(image, None);
        return Err(error.into());
    }

    Ok((image, memory))
}

pub unsafe fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::_2D)
        .format(format)
        .subresource_range(subresource_range(aspect_mask));

    Ok(device.create_image_view(&info, None)?)
}

fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::builder()
        .aspect_mask(aspect_mask)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
        .build()
}

/// Records `record` into a throwaway command buffer, submits it to `queue`
/// and blocks until the queue is idle.
pub unsafe fn submit_one_time(
    device: &Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    record: impl FnOnce(vk::CommandBuffer),
) -> Result<()> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_pool(pool)
        .command_buffer_count(1);

    let command_buffer = device.allocate_command_buffers(&alloc_info)?[0];

    let result = (|| -> Result<()> {
        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(command_buffer, &info)?;

        record(command_buffer);

        device.end_command_buffer(command_buffer)?;

        let command_buffers = &[command_buffer];
        let info = vk::SubmitInfo::builder().command_buffers(command_buffers);
        device.queue_submit(queue, &[info], vk::Fence::null())?;
        device.queue_wait_idle(queue)?;
        Ok(())
    })();

    device.free_command_buffers(pool, &[command_buffer]);

    result
}

/// Copies `regions` between buffers on the transfer queue.
pub unsafe fn copy_buffer(
    context: &Context,
    src_buffer: vk::Buffer,
    dst_buffer: vk::Buffer,
    regions: &[vk::BufferCopy],
) -> Result<()> {
    if regions.is_empty() {
        return Ok(());
    }

    submit_one_time(
        &context.device,
        context.transfer_pool,
        context.transfer_queue,
        |command_buffer| {
            context
                .device
                .cmd_copy_buffer(command_buffer, src_buffer, dst_buffer, regions)
        },
    )
}

pub unsafe fn copy_buffer_to_image(
    context: &Context,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) -> Result<()> {
    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1)
                .build(),
        )
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        });

    submit_one_time(
        &context.device,
        context.transfer_pool,
        context.transfer_queue,
        |command_buffer| {
            context.device.cmd_copy_buffer_to_image(
                command_buffer,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        },
    )
}

/// Runs on the graphics queue since the destination stages may be graphics
/// only.
pub unsafe fn transition_image_layout(
    context: &Context,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let (aspect_mask, src_access_mask, dst_access_mask, src_stage_mask, dst_stage_mask) =
        match (old_layout, new_layout) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
                vk::ImageAspectFlags::COLOR,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
                vk::ImageAspectFlags::COLOR,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
                vk::ImageAspectFlags::DEPTH,
                vk::AccessFlags::empty(),
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            ),
            _ => return Err(anyhow!("Unsupported layout transition!")),
        };

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect_mask))
        .src_access_mask(src_access_mask)
        .dst_access_mask(dst_access_mask);

    submit_one_time(
        &context.device,
        context.general_pool,
        context.graphics_queue,
        |command_buffer| {
            context.device.cmd_pipeline_barrier(
                command_buffer,
                src_stage_mask,
                dst_stage_mask,
                vk::DependencyFlags::empty(),
                &[] as &[vk::MemoryBarrier],
                &[] as &[vk::BufferMemoryBarrier],
                &[barrier],
            )
        },
    )
}

/// Uploads `data` into `dst_buffer` at `dst_offset` through a temporary
/// staging buffer.
pub unsafe fn fill_buffer(
    context: &Context,
    dst_buffer: vk::Buffer,
    dst_offset: vk::DeviceSize,
    data: &[u8],
) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }

    let device = &context.device;
    let size = data.len() as vk::DeviceSize;
    let (staging_buffer, staging_memory) = create_staging_buffer(context, size)?;

    let result = (|| -> Result<()> {
        let memory = device.map_memory(staging_memory, 0, size, vk::MemoryMapFlags::empty())?;
        copy_nonoverlapping(data.as_ptr(), memory.cast(), data.len());
        device.unmap_memory(staging_memory);

        let region = vk::BufferCopy::builder()
            .src_offset(0)
            .dst_offset(dst_offset)
            .size(size)
            .build();
        copy_buffer(context, staging_buffer, dst_buffer, &[region])
    })();

    destroy_buffer(device, staging_buffer, staging_memory);

    result
}

/// Reads `size` bytes from the start of a `TRANSFER_SRC` buffer back to the
/// host.
pub unsafe fn read_buffer(
    context: &Context,
    src_buffer: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<Vec<u8>> {
    let device = &context.device;
    let (readback_buffer, readback_memory) = create_buffer(
        context,
        size,
        vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    let result = (|| -> Result<Vec<u8>> {
        let region = vk::BufferCopy::builder()
            .src_offset(0)
            .dst_offset(0)
            .size(size)
            .build();
        copy_buffer(context, src_buffer, readback_buffer, &[region])?;

        let mut bytes = vec![0u8; size as usize];
        let memory = device.map_memory(readback_memory, 0, size, vk::MemoryMapFlags::empty())?;
        copy_nonoverlapping(memory.cast::<u8>(), bytes.as_mut_ptr(), bytes.len());
        device.unmap_memory(readback_memory);
        Ok(bytes)
    })();

    destroy_buffer(device, readback_buffer, readback_memory);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties::default();
        memory.memory_type_count = flags.len() as u32;
        for (slot, flags) in memory.memory_types.iter_mut().zip(flags) {
            slot.property_flags = *flags;
        }
        memory
    }

    #[test]
    fn first_matching_type_wins() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let memory = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            host,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(select_memory_type(&memory, 0b111, host).unwrap(), 1);
        assert_eq!(select_memory_type(&memory, 0b100, host).unwrap(), 2);
        assert_eq!(
            select_memory_type(&memory, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn type_filter_is_respected() {
        let memory = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(
            select_memory_type(&memory, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            1
        );
    }

    #[test]
    fn no_match_is_an_error() {
        let memory = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let error =
            select_memory_type(&memory, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert_eq!(
            error.downcast_ref::<Error>(),
            Some(&Error::NoSuitableMemoryType)
        );
    }
}

//! Sprite batches: quads staged on the host and copied into one device-local
//! buffer holding a vertex region followed by a `u16` index region.

use std::sync::Arc;

use anyhow::Result;
use vulkanalia::prelude::v1_3::*;

use crate::engine::Engine;
use crate::error::Error;
use crate::sprite::{INDICES_PER_SPRITE, Sprite, VERTICES_PER_SPRITE, quad_indices};
use crate::vertex::Vertex;
use crate::vulkan::Context;
use crate::vulkan::resources;

/// Largest capacity whose vertices are all addressable by `u16` indices.
pub const MAX_SPRITE_CAPACITY: usize = (u16::MAX as usize + 1) / VERTICES_PER_SPRITE;

const VERTEX_BYTES_PER_SPRITE: usize = size_of::<Vertex>() * VERTICES_PER_SPRITE;
const INDEX_BYTES_PER_SPRITE: usize = size_of::<u16>() * INDICES_PER_SPRITE;

/// Byte layout of the combined buffer for a given capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLayout {
    pub capacity: usize,
    pub vertex_offset: usize,
    pub vertex_capacity: usize,
    pub index_offset: usize,
    pub index_capacity: usize,
}

impl BatchLayout {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_SPRITE_CAPACITY {
            return Err(Error::InvalidCapacity {
                capacity,
                max: MAX_SPRITE_CAPACITY,
            }
            .into());
        }

        let vertex_capacity = capacity * VERTEX_BYTES_PER_SPRITE;
        Ok(Self {
            capacity,
            vertex_offset: 0,
            vertex_capacity,
            index_offset: vertex_capacity,
            index_capacity: capacity * INDEX_BYTES_PER_SPRITE,
        })
    }

    pub fn size(&self) -> usize {
        self.vertex_capacity + self.index_capacity
    }
}

/// Bytes written so far into each region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchCursor {
    pub vertex_data_size: usize,
    pub index_data_size: usize,
    pub index_count: u32,
}

impl BatchCursor {
    pub fn sprite_count(&self) -> usize {
        self.vertex_data_size / VERTEX_BYTES_PER_SPRITE
    }

    /// Appends `sprites` into `staging` (laid out per `layout`). Either all
    /// sprites fit and are written, or nothing is.
    pub fn write(&mut self, layout: &BatchLayout, staging: &mut [u8], sprites: &[Sprite]) -> Result<()> {
        let remaining = layout.capacity - self.sprite_count();
        if sprites.len() > remaining {
            return Err(Error::CapacityExceeded {
                requested: sprites.len(),
                remaining,
            }
            .into());
        }

        let mut base_vertex = (self.vertex_data_size / size_of::<Vertex>()) as u16;
        for sprite in sprites {
            let vertex_start = layout.vertex_offset + self.vertex_data_size;
            let vertices = sprite.vertices();
            staging[vertex_start..vertex_start + VERTEX_BYTES_PER_SPRITE]
                .copy_from_slice(bytemuck::cast_slice(&vertices));

            let index_start = layout.index_offset + self.index_data_size;
            let indices = quad_indices(base_vertex);
            staging[index_start..index_start + INDEX_BYTES_PER_SPRITE]
                .copy_from_slice(bytemuck::cast_slice(&indices));

            // Wraps only past the final sprite of a full batch.
            base_vertex = base_vertex.wrapping_add(VERTICES_PER_SPRITE as u16);
            self.vertex_data_size += VERTEX_BYTES_PER_SPRITE;
            self.index_data_size += INDEX_BYTES_PER_SPRITE;
            self.index_count += INDICES_PER_SPRITE as u32;
        }

        Ok(())
    }

    /// Staging-to-device copies covering exactly the written bytes. Empty
    /// regions are left out.
    pub fn copy_regions(&self, layout: &BatchLayout) -> Vec<vk::BufferCopy> {
        [
            (layout.vertex_offset, self.vertex_data_size),
            (layout.index_offset, self.index_data_size),
        ]
        .into_iter()
        .filter(|(_, size)| *size > 0)
        .map(|(offset, size)| {
            vk::BufferCopy::builder()
                .src_offset(offset as vk::DeviceSize)
                .dst_offset(offset as vk::DeviceSize)
                .size(size as vk::DeviceSize)
                .build()
        })
        .collect()
    }
}

#[derive(Debug)]
enum BatchState<S> {
    /// Created or cleared; nothing to draw.
    Idle,
    /// Accepting sprites into the staging memory.
    Staging(S),
    /// Uploaded and drawable.
    Ready,
}

/// Host-side half of a sprite batch, generic over its staging memory.
#[derive(Debug)]
pub struct BatchCore<S> {
    layout: BatchLayout,
    cursor: BatchCursor,
    state: BatchState<S>,
}

impl<S: AsMut<[u8]>> BatchCore<S> {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            layout: BatchLayout::new(capacity)?,
            cursor: BatchCursor::default(),
            state: BatchState::Idle,
        })
    }

    pub fn layout(&self) -> &BatchLayout {
        &self.layout
    }

    pub fn cursor(&self) -> &BatchCursor {
        &self.cursor
    }

    pub fn is_begun(&self) -> bool {
        matches!(self.state, BatchState::Staging(_))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, BatchState::Ready)
    }

    /// Starts a new upload; `create_staging` receives the full buffer size.
    pub fn begin(&mut self, create_staging: impl FnOnce(usize) -> Result<S>) -> Result<()> {
        if self.is_begun() {
            return Err(Error::BatchAlreadyBegun.into());
        }

        let staging = create_staging(self.layout.size())?;
        self.cursor = BatchCursor::default();
        self.state = BatchState::Staging(staging);
        Ok(())
    }

    pub fn add(&mut self, sprites: &[Sprite]) -> Result<()> {
        let BatchState::Staging(staging) = &mut self.state else {
            return Err(Error::BatchNotBegun.into());
        };
        self.cursor.write(&self.layout, staging.as_mut(), sprites)
    }

    /// Hands back the staging memory and the regions to copy out of it.
    pub fn end(&mut self) -> Result<(S, Vec<vk::BufferCopy>)> {
        match std::mem::replace(&mut self.state, BatchState::Ready) {
            BatchState::Staging(staging) => Ok((staging, self.cursor.copy_regions(&self.layout))),
            other => {
                self.state = other;
                Err(Error::BatchNotBegun.into())
            }
        }
    }

    /// Forgets all sprites, returning staging memory that is still live.
    pub fn clear(&mut self) -> Option<S> {
        self.cursor = BatchCursor::default();
        match std::mem::replace(&mut self.state, BatchState::Idle) {
            BatchState::Staging(staging) => Some(staging),
            _ => None,
        }
    }

    /// Index count to draw, or an error while an upload is in progress.
    pub fn drawable_index_count(&self) -> Result<u32> {
        if self.is_begun() {
            return Err(Error::BatchNotEnded.into());
        }
        Ok(self.cursor.index_count)
    }
}

/// Host-visible staging buffer, mapped for as long as it lives.
#[derive(Debug)]
pub struct StagingBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    size: usize,
}

impl StagingBuffer {
    unsafe fn create(context: &Context, size: usize) -> Result<Self> {
        let device = &context.device;
        let (buffer, memory) =
            resources::create_staging_buffer(context, size as vk::DeviceSize)?;
        let mapped = device
            .map_memory(memory, 0, size as vk::DeviceSize, vk::MemoryMapFlags::empty())
            .inspect_err(|_| resources::destroy_buffer(device, buffer, memory))?;

        Ok(Self {
            buffer,
            memory,
            mapped: mapped.cast(),
            size,
        })
    }

    unsafe fn destroy(self, device: &Device) {
        device.unmap_memory(self.memory);
        resources::destroy_buffer(device, self.buffer, self.memory);
    }
}

impl AsMut<[u8]> for StagingBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        // The mapping stays valid until `destroy` consumes the buffer.
        unsafe { std::slice::from_raw_parts_mut(self.mapped, self.size) }
    }
}

/// A bounded pool of quads drawn with a single indexed draw call.
///
/// Build with [`begin`](Self::begin), [`add`](Self::add) and
/// [`end`](Self::end), then [`draw`](Self::draw) inside an open frame.
pub struct SpriteBatch {
    context: Arc<Context>,
    buffer: vk::Buffer,
    buffer_memory: vk::DeviceMemory,
    core: BatchCore<StagingBuffer>,
}

impl SpriteBatch {
    /// Allocates device-local storage for `capacity` sprites.
    pub unsafe fn new(engine: &Engine, capacity: usize) -> Result<Self> {
        let core = BatchCore::new(capacity)?;
        let context = engine.context().clone();

        let (buffer, buffer_memory) = resources::create_buffer(
            &context,
            core.layout().size() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        log::debug!(
            "Created sprite batch for {} sprites ({} bytes).",
            capacity,
            core.layout().size()
        );

        Ok(Self {
            context,
            buffer,
            buffer_memory,
            core,
        })
    }

    /// Maps a fresh staging buffer and rewinds the write cursors.
    pub unsafe fn begin(&mut self) -> Result<()> {
        let context = &self.context;
        self.core
            .begin(|size| StagingBuffer::create(context, size))
    }

    /// Bakes `sprites` into staging memory. Fails without writing anything
    /// if they do not all fit.
    pub fn add(&mut self, sprites: &[Sprite]) -> Result<()> {
        self.core.add(sprites)
    }

    /// Copies the written ranges to the device and releases staging memory.
    pub unsafe fn end(&mut self) -> Result<()> {
        let (staging, regions) = self.core.end()?;

        let result = resources::copy_buffer(&self.context, staging.buffer, self.buffer, &regions);
        staging.destroy(&self.context.device);

        if let Err(error) = result {
            self.core.clear();
            return Err(error);
        }

        log::debug!(
            "Uploaded {} sprites ({} indices).",
            self.core.cursor().sprite_count(),
            self.core.cursor().index_count
        );
        Ok(())
    }

    /// Empties the batch, keeping its capacity. Device memory is untouched.
    pub unsafe fn clear(&mut self) {
        if let Some(staging) = self.core.clear() {
            staging.destroy(&self.context.device);
        }
    }

    /// Records the batch into `engine`'s open frame.
    pub unsafe fn draw(&self, engine: &Engine) -> Result<()> {
        let index_count = self.core.drawable_index_count()?;

        if !Arc::ptr_eq(&self.context, engine.context()) {
            return Err(Error::EngineMismatch.into());
        }

        if index_count == 0 {
            return Ok(());
        }

        let command_buffer = engine.recording_command_buffer()?;
        let device = &self.context.device;
        let layout = self.core.layout();

        device.cmd_bind_vertex_buffers(
            command_buffer,
            0,
            &[self.buffer],
            &[layout.vertex_offset as vk::DeviceSize],
        );
        device.cmd_bind_index_buffer(
            command_buffer,
            self.buffer,
            layout.index_offset as vk::DeviceSize,
            vk::IndexType::UINT16,
        );
        device.cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0);

        Ok(())
    }

    /// Copies the whole device-local buffer back to the host.
    pub unsafe fn read_back(&self) -> Result<Vec<u8>> {
        resources::read_buffer(
            &self.context,
            self.buffer,
            self.core.layout().size() as vk::DeviceSize,
        )
    }

    pub fn layout(&self) -> &BatchLayout {
        self.core.layout()
    }

    /// The combined vertex/index buffer.
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn capacity(&self) -> usize {
        self.core.layout().capacity
    }

    pub fn len(&self) -> usize {
        self.core.cursor().sprite_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index_count(&self) -> u32 {
        self.core.cursor().index_count
    }

    pub fn is_begun(&self) -> bool {
        self.core.is_begun()
    }
}

impl Drop for SpriteBatch {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe {
            if let Err(error) = device.device_wait_idle() {
                log::warn!("Failed to wait for device idle during teardown: {error}");
            }
            if let Some(staging) = self.core.clear() {
                staging.destroy(device);
            }
            resources::destroy_buffer(device, self.buffer, self.buffer_memory);
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;

    fn sprite(x: f32, depth: f32) -> Sprite {
        Sprite::new(Vec2::new(x, x), Vec2::splat(200.0), depth)
    }

    fn begun(capacity: usize) -> BatchCore<Vec<u8>> {
        let mut core = BatchCore::new(capacity).unwrap();
        core.begin(|size| Ok(vec![0u8; size])).unwrap();
        core
    }

    fn error_kind(result: Result<impl std::fmt::Debug>) -> Error {
        result
            .unwrap_err()
            .downcast_ref::<Error>()
            .cloned()
            .expect("expected a moss_vk::Error")
    }

    #[test]
    fn layout_puts_indices_after_vertices() {
        let layout = BatchLayout::new(3).unwrap();
        assert_eq!(layout.vertex_offset, 0);
        assert_eq!(layout.vertex_capacity, 3 * 4 * 20);
        assert_eq!(layout.index_offset, 240);
        assert_eq!(layout.index_capacity, 3 * 6 * 2);
        assert_eq!(layout.size(), 276);
    }

    #[test]
    fn capacity_is_bounded() {
        assert!(matches!(
            error_kind(BatchLayout::new(0)),
            Error::InvalidCapacity { capacity: 0, .. }
        ));
        assert!(BatchLayout::new(MAX_SPRITE_CAPACITY).is_ok());
        assert!(BatchLayout::new(MAX_SPRITE_CAPACITY + 1).is_err());
    }

    #[test]
    fn add_requires_begin() {
        let mut core = BatchCore::<Vec<u8>>::new(2).unwrap();
        assert_eq!(error_kind(core.add(&[sprite(0.0, 0.0)])), Error::BatchNotBegun);

        core.begin(|size| Ok(vec![0u8; size])).unwrap();
        core.end().unwrap();
        assert!(core.is_ready());
        assert_eq!(error_kind(core.add(&[sprite(0.0, 0.0)])), Error::BatchNotBegun);
    }

    #[test]
    fn double_begin_fails_without_creating_staging() {
        let mut core = begun(1);
        let mut created = false;
        let result = core.begin(|size| {
            created = true;
            Ok(vec![0u8; size])
        });
        assert_eq!(error_kind(result), Error::BatchAlreadyBegun);
        assert!(!created);
    }

    #[test]
    fn end_requires_begin() {
        let mut core = BatchCore::<Vec<u8>>::new(1).unwrap();
        assert_eq!(error_kind(core.end()), Error::BatchNotBegun);
    }

    #[test]
    fn draw_is_refused_while_begun() {
        let mut core = begun(1);
        core.add(&[sprite(0.0, 0.0)]).unwrap();
        assert_eq!(error_kind(core.drawable_index_count()), Error::BatchNotEnded);

        core.end().unwrap();
        assert_eq!(core.drawable_index_count().unwrap(), 6);
    }

    #[test]
    fn three_sprites_make_eighteen_indices() {
        let mut core = begun(3);
        core.add(&[sprite(0.0, 0.0), sprite(50.0, 0.5), sprite(100.0, 1.0)])
            .unwrap();
        let (staging, _) = core.end().unwrap();

        assert_eq!(core.cursor().index_count, 18);
        let layout = *core.layout();
        let indices: Vec<u16> = staging[layout.index_offset..layout.size()]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(
            indices,
            vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4, 8, 9, 10, 10, 11, 8]
        );
    }

    #[test]
    fn overflowing_add_writes_nothing() {
        let mut core = begun(2);
        core.add(&[sprite(0.0, 0.0)]).unwrap();
        let before = *core.cursor();

        let result = core.add(&[sprite(1.0, 0.0), sprite(2.0, 0.0)]);
        assert_eq!(
            error_kind(result),
            Error::CapacityExceeded {
                requested: 2,
                remaining: 1
            }
        );
        assert_eq!(*core.cursor(), before);

        core.add(&[sprite(1.0, 0.0)]).unwrap();
        assert_eq!(core.cursor().sprite_count(), 2);
    }

    #[test]
    fn partial_batch_copies_only_written_bytes() {
        let mut core = begun(4);
        core.add(&[sprite(0.0, 0.0)]).unwrap();
        let (_, regions) = core.end().unwrap();

        let layout = core.layout();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].src_offset, 0);
        assert_eq!(regions[0].size, 80);
        assert_eq!(regions[1].src_offset, layout.index_offset as u64);
        assert_eq!(regions[1].dst_offset, layout.index_offset as u64);
        assert_eq!(regions[1].size, 12);
    }

    #[test]
    fn empty_batch_copies_nothing() {
        let mut core = begun(4);
        let (_, regions) = core.end().unwrap();
        assert!(regions.is_empty());
        assert_eq!(core.drawable_index_count().unwrap(), 0);
    }

    #[test]
    fn uploaded_regions_match_staging() {
        let mut core = begun(3);
        core.add(&[sprite(0.0, 0.0), sprite(50.0, 0.5)]).unwrap();
        let (staging, regions) = core.end().unwrap();

        // Apply the copies to a simulated device buffer.
        let layout = *core.layout();
        let mut device = vec![0xAAu8; layout.size()];
        for region in &regions {
            let (src, dst, size) = (
                region.src_offset as usize,
                region.dst_offset as usize,
                region.size as usize,
            );
            device[dst..dst + size].copy_from_slice(&staging[src..src + size]);
        }

        let cursor = core.cursor();
        let vertices = layout.vertex_offset..layout.vertex_offset + cursor.vertex_data_size;
        let indices = layout.index_offset..layout.index_offset + cursor.index_data_size;
        assert_eq!(device[vertices.clone()], staging[vertices.clone()]);
        assert_eq!(device[indices.clone()], staging[indices]);

        let written: &[Vertex] = &bytemuck::pod_read_unaligned::<[Vertex; 8]>(&device[vertices]);
        assert_eq!(written[0].pos, [-100.0, 100.0, 0.0]);
        assert_eq!(written[6].pos, [150.0, -50.0, 0.5]);
    }

    #[test]
    fn rebegin_rewrites_from_start() {
        let mut core = begun(2);
        core.add(&[sprite(0.0, 0.0), sprite(1.0, 0.0)]).unwrap();
        core.end().unwrap();

        core.begin(|size| Ok(vec![0u8; size])).unwrap();
        assert_eq!(core.cursor().index_count, 0);
        core.add(&[sprite(2.0, 0.0), sprite(3.0, 0.0)]).unwrap();
        assert_eq!(core.cursor().index_count, 12);
    }

    #[test]
    fn clear_returns_live_staging() {
        let mut core = begun(2);
        core.add(&[sprite(0.0, 0.0)]).unwrap();
        assert!(core.clear().is_some());
        assert_eq!(*core.cursor(), BatchCursor::default());
        assert!(!core.is_begun());

        core.begin(|size| Ok(vec![0u8; size])).unwrap();
        core.end().unwrap();
        assert!(core.clear().is_none());
        assert_eq!(core.drawable_index_count().unwrap(), 0);
    }

    #[test]
    fn full_batch_uses_every_u16_vertex() {
        let mut core = begun(MAX_SPRITE_CAPACITY);
        let sprites = vec![sprite(0.0, 0.0); MAX_SPRITE_CAPACITY];
        core.add(&sprites).unwrap();
        let (staging, _) = core.end().unwrap();

        let layout = *core.layout();
        let last = &staging[layout.size() - 12..];
        let last: Vec<u16> = last
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(last, vec![65532, 65533, 65534, 65534, 65535, 65532]);
    }
}

//! GPU-backed checks. They need a Vulkan driver and a display, so they only
//! run with `cargo test -- --ignored`.

#![allow(unsafe_op_in_unsafe_fn)]

use anyhow::Result;
use glam::Vec2;
use winit::dpi::PhysicalSize;
use winit::event_loop::{EventLoop, EventLoopBuilder};
use winit::window::{Window, WindowBuilder};

use moss_vk::config;
use moss_vk::vulkan::resources;
use moss_vk::{AppInfo, Engine, EngineConfig, Error, FrameStatus, Sprite, SpriteBatch};

fn event_loop() -> Result<EventLoop<()>> {
    let mut builder = EventLoopBuilder::new();
    // The test harness does not run tests on the main thread.
    #[cfg(target_os = "linux")]
    {
        use winit::platform::x11::EventLoopBuilderExtX11;
        builder.with_any_thread(true);
    }
    Ok(builder.build()?)
}

fn depth_sprites() -> [Sprite; 3] {
    [
        Sprite::new(Vec2::new(0.0, 0.0), Vec2::splat(200.0), 0.0),
        Sprite::new(Vec2::new(50.0, 50.0), Vec2::splat(200.0), 0.5),
        Sprite::new(Vec2::new(100.0, 100.0), Vec2::splat(200.0), 1.0),
    ]
}

fn error_kind(error: anyhow::Error) -> Option<Error> {
    error.downcast_ref::<Error>().cloned()
}

fn engine_config(window: &Window) -> EngineConfig<'_, Window> {
    EngineConfig::new(AppInfo::new("Moss Engine Test", (0, 1, 0)), window, || {
        (640, 360)
    })
    .with_shaders(config::DEFAULT_VERTEX_SHADER, config::DEFAULT_FRAGMENT_SHADER)
    .with_atlas(concat!(env!("CARGO_MANIFEST_DIR"), "/textures/atlas.png"))
    .with_validation(true)
}

fn hidden_window(event_loop: &EventLoop<()>) -> Result<Window> {
    Ok(WindowBuilder::new()
        .with_title("Moss Engine Test")
        .with_inner_size(PhysicalSize::new(640, 360))
        .with_visible(false)
        .build(event_loop)?)
}

unsafe fn create_engine(window: &Window) -> Result<Engine> {
    let mut engine = Engine::create(engine_config(window))?;
    engine.camera_mut().set_size(Vec2::new(960.0, 540.0))?;
    Ok(engine)
}

/// Begins frames until one is actually recording.
unsafe fn open_frame(engine: &mut Engine) -> Result<()> {
    for _ in 0..4 {
        if engine.begin_frame()? == FrameStatus::Recording {
            return Ok(());
        }
    }
    anyhow::bail!("swapchain never became usable")
}

unsafe fn end_to_end(engine: &mut Engine) -> Result<()> {
    let mut batch = SpriteBatch::new(engine, 3)?;
    batch.begin()?;
    batch.add(&depth_sprites())?;
    batch.end()?;

    open_frame(engine)?;
    batch.draw(engine)?;
    engine.end_frame()?;

    assert_eq!(batch.index_count(), 18);
    assert_eq!(batch.len(), 3);
    Ok(())
}

unsafe fn uploaded_bytes_match(engine: &Engine) -> Result<()> {
    let sprites = depth_sprites();
    let mut batch = SpriteBatch::new(engine, 4)?;
    batch.begin()?;
    batch.add(&sprites)?;
    batch.end()?;

    let vertices: Vec<_> = sprites.iter().flat_map(|sprite| sprite.vertices()).collect();
    let indices: Vec<u16> = (0..sprites.len() as u16)
        .flat_map(|sprite| moss_vk::sprite::quad_indices(sprite * 4))
        .collect();

    let layout = *batch.layout();
    let device = batch.read_back()?;
    assert_eq!(device.len(), layout.size());

    let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
    let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
    assert_eq!(&device[..vertex_bytes.len()], vertex_bytes);
    assert_eq!(
        &device[layout.index_offset..layout.index_offset + index_bytes.len()],
        index_bytes
    );

    // Overwrite the first quad's indices directly and read them back.
    let flipped: [u16; 6] = [0, 3, 2, 2, 1, 0];
    resources::fill_buffer(
        engine.context(),
        batch.buffer(),
        layout.index_offset as u64,
        bytemuck::cast_slice(&flipped),
    )?;
    let device = batch.read_back()?;
    assert_eq!(
        &device[layout.index_offset..layout.index_offset + 12],
        bytemuck::cast_slice::<u16, u8>(&flipped)
    );
    assert_eq!(
        &device[layout.index_offset + 12..layout.index_offset + index_bytes.len()],
        &index_bytes[12..]
    );

    Ok(())
}

unsafe fn recreate_is_idempotent(engine: &mut Engine) -> Result<()> {
    let before = engine.swapchain_info();
    assert!(before.image_count >= 2);
    assert_eq!(before.extent.width, 640);
    assert_eq!(before.extent.height, 360);

    engine.recreate_swapchain()?;
    engine.recreate_swapchain()?;
    assert_eq!(engine.swapchain_info(), before);

    // The engine still renders after being rebuilt.
    open_frame(engine)?;
    engine.end_frame()?;
    Ok(())
}

unsafe fn misuse_is_reported(engine: &mut Engine) -> Result<()> {
    let mut batch = SpriteBatch::new(engine, 1)?;

    let error = batch.add(&depth_sprites()[..1]).unwrap_err();
    assert_eq!(error_kind(error), Some(Error::BatchNotBegun));

    batch.begin()?;
    let error = batch.add(&depth_sprites()).unwrap_err();
    assert_eq!(
        error_kind(error),
        Some(Error::CapacityExceeded {
            requested: 3,
            remaining: 1
        })
    );
    let error = batch.begin().unwrap_err();
    assert_eq!(error_kind(error), Some(Error::BatchAlreadyBegun));

    open_frame(engine)?;
    let error = batch.draw(engine).unwrap_err();
    assert_eq!(error_kind(error), Some(Error::BatchNotEnded));
    assert_eq!(
        error_kind(engine.recreate_swapchain().unwrap_err()),
        Some(Error::FrameAlreadyOpen)
    );
    engine.end_frame()?;

    batch.add(&depth_sprites()[..1])?;
    batch.end()?;
    let error = batch.draw(engine).unwrap_err();
    assert_eq!(error_kind(error), Some(Error::NoOpenFrame));
    let error = engine.end_frame().unwrap_err();
    assert_eq!(error_kind(error), Some(Error::NoOpenFrame));

    batch.clear();
    assert_eq!(batch.index_count(), 0);
    open_frame(engine)?;
    batch.draw(engine)?;
    engine.end_frame()?;
    Ok(())
}

unsafe fn frames_keep_cycling(engine: &mut Engine) -> Result<()> {
    let mut batch = SpriteBatch::new(engine, 3)?;
    batch.begin()?;
    batch.add(&depth_sprites())?;
    batch.end()?;

    // Several times the slot count, so every fence is waited on and reused.
    for _ in 0..4 * config::MAX_FRAMES_IN_FLIGHT + 1 {
        open_frame(engine)?;
        assert!(engine.is_frame_open());
        batch.draw(engine)?;
        engine.end_frame()?;
        assert!(!engine.is_frame_open());
    }
    Ok(())
}

unsafe fn batches_stay_with_their_engine(engine: &mut Engine, other: &Engine) -> Result<()> {
    let mut foreign = SpriteBatch::new(other, 1)?;
    foreign.begin()?;
    foreign.add(&depth_sprites()[..1])?;
    foreign.end()?;

    open_frame(engine)?;
    let error = foreign.draw(engine).unwrap_err();
    assert_eq!(error_kind(error), Some(Error::EngineMismatch));
    engine.end_frame()?;
    Ok(())
}

unsafe fn failed_creation_rolls_back(window: &Window) -> Result<()> {
    let config = engine_config(window).with_atlas("missing.png");
    assert!(Engine::create(config).is_err());

    // Everything was released, so the same window can host a new engine.
    let mut engine = create_engine(window)?;
    open_frame(&mut engine)?;
    engine.end_frame()?;
    Ok(())
}

// One test only: winit allows a single event loop per process.
#[test]
#[ignore = "needs a Vulkan device and a display"]
fn engine_on_gpu() -> Result<()> {
    let _ = pretty_env_logger::try_init();

    let event_loop = event_loop()?;
    let window = hidden_window(&event_loop)?;
    let other_window = hidden_window(&event_loop)?;
    let spare_window = hidden_window(&event_loop)?;

    unsafe {
        let mut engine = create_engine(&window)?;
        end_to_end(&mut engine)?;
        uploaded_bytes_match(&engine)?;
        recreate_is_idempotent(&mut engine)?;
        misuse_is_reported(&mut engine)?;
        frames_keep_cycling(&mut engine)?;

        let other = create_engine(&other_window)?;
        batches_stay_with_their_engine(&mut engine, &other)?;
        drop(other);

        failed_creation_rolls_back(&spare_window)?;
    }

    Ok(())
}

#![allow(unsafe_op_in_unsafe_fn)]

use std::env;
use std::rc::Rc;

use anyhow::Result;
use glam::Vec2;
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

use moss_vk::{AppInfo, Engine, EngineConfig, FrameStatus, Sprite, SpriteBatch};

const INITIAL_WINDOW_WIDTH: u32 = 640;
const INITIAL_WINDOW_HEIGHT: u32 = 360;

/// World units visible across the window, independent of its pixel size.
const VIEW_SIZE: Vec2 = Vec2::new(960.0, 540.0);

const SPRITE_SIZE: f32 = 200.0;

/// Three overlapping sprites; the one with the lowest depth ends up on top.
fn depth_sprites() -> [Sprite; 3] {
    [
        Sprite::new(Vec2::new(0.0, 0.0), Vec2::splat(SPRITE_SIZE), 0.0),
        Sprite::new(Vec2::new(50.0, 50.0), Vec2::splat(SPRITE_SIZE), 0.5),
        Sprite::new(Vec2::new(100.0, 100.0), Vec2::splat(SPRITE_SIZE), 1.0),
    ]
}

/// Small sprites scattered over the view behind the depth test trio.
fn scattered_sprites(count: usize) -> Vec<Sprite> {
    let half = VIEW_SIZE * 0.5;
    (0..count)
        .map(|_| {
            let position = Vec2::new(
                fastrand::f32() * VIEW_SIZE.x - half.x,
                fastrand::f32() * VIEW_SIZE.y - half.y,
            );
            let depth = 0.25 + fastrand::f32() * 0.5;
            Sprite::new(position, Vec2::splat(SPRITE_SIZE * 0.125), depth)
        })
        .collect()
}

struct Demo {
    batch: SpriteBatch,
    engine: Engine,
}

impl Demo {
    unsafe fn create(window: Rc<Window>, extra_sprites: usize) -> Result<Self> {
        let size_window = window.clone();
        let config = EngineConfig::new(
            AppInfo::new("Moss Depth Test", (0, 1, 0)),
            &*window,
            move || {
                let size = size_window.inner_size();
                (size.width, size.height)
            },
        );
        log::debug!("{config:?}");

        let mut engine = Engine::create(config)?;
        let camera = engine.camera_mut();
        camera.set_size(VIEW_SIZE)?;
        camera.set_position(Vec2::ZERO);

        let mut sprites = scattered_sprites(extra_sprites);
        sprites.extend(depth_sprites());

        let mut batch = SpriteBatch::new(&engine, sprites.len())?;
        batch.begin()?;
        batch.add(&sprites)?;
        batch.end()?;

        log::info!(
            "Batched {} sprites ({} indices).",
            batch.len(),
            batch.index_count()
        );

        Ok(Self { batch, engine })
    }

    unsafe fn render(&mut self) -> Result<()> {
        match self.engine.begin_frame()? {
            FrameStatus::Skipped => Ok(()),
            FrameStatus::Recording => {
                // Close the frame even if recording the batch failed.
                let drawn = self.batch.draw(&self.engine);
                self.engine.end_frame()?;
                drawn
            }
        }
    }
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let extra_sprites = match env::args().nth(1) {
        Some(arg) => arg.parse::<usize>()?,
        None => 0,
    };

    let event_loop = EventLoop::new()?;
    let window = Rc::new(
        WindowBuilder::new()
            .with_title("Moss Depth Test")
            .with_inner_size(LogicalSize::new(INITIAL_WINDOW_WIDTH, INITIAL_WINDOW_HEIGHT))
            .build(&event_loop)?,
    );

    let mut demo = Some(unsafe { Demo::create(window.clone(), extra_sprites)? });

    event_loop.run(move |event, target| match event {
        Event::WindowEvent {
            event: WindowEvent::CloseRequested,
            ..
        } => {
            // Batch first, then the engine and its device.
            demo.take();
            target.exit();
        }
        Event::WindowEvent {
            event: WindowEvent::Resized(_),
            ..
        } => {
            if let Some(demo) = demo.as_mut() {
                demo.engine.notify_resized();
            }
        }
        Event::WindowEvent {
            event: WindowEvent::RedrawRequested,
            ..
        } => {
            if let Some(app) = demo.as_mut() {
                if let Err(error) = unsafe { app.render() } {
                    log::error!("Rendering failed: {error:#}");
                    demo.take();
                    target.exit();
                }
            }
        }
        Event::AboutToWait => {
            window.request_redraw();
        }
        _ => {}
    })?;

    Ok(())
}

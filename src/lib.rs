//! A thin Vulkan 2D renderer: an [`Engine`] that owns the device, swapchain
//! and frame loop, and [`SpriteBatch`]es that stage textured quads into a
//! combined vertex/index buffer for drawing inside an open frame.

#![allow(unsafe_op_in_unsafe_fn)]

pub mod camera;
pub mod config;
pub mod engine;
pub mod error;
pub mod sprite;
pub mod sprite_batch;
pub mod vertex;
pub mod vulkan;

pub use camera::Camera;
pub use config::{AppInfo, EngineConfig};
pub use engine::{Engine, FrameStatus, SwapchainInfo};
pub use error::Error;
pub use sprite::{Sprite, UvRect};
pub use sprite_batch::SpriteBatch;

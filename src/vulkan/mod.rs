//! Vulkan plumbing shared by the engine and sprite batches.

pub mod context;
pub mod device;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod resources;
pub mod swapchain;
pub mod texture;

pub use context::Context;

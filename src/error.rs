use thiserror::Error;

/// Misuse and invariant failures reported by the engine and sprite batches.
///
/// These travel inside [`anyhow::Error`], so callers can recover the exact
/// kind with `error.downcast_ref::<moss_vk::Error>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Sprite batch already begun.")]
    BatchAlreadyBegun,
    #[error("Sprite batch not begun. Call `begin` first.")]
    BatchNotBegun,
    #[error("Sprite batch not ended. Call `end` first.")]
    BatchNotEnded,
    #[error("Sprite batch was created with a different engine.")]
    EngineMismatch,
    #[error("Sprite batch capacity exceeded: {requested} sprites requested, {remaining} remaining.")]
    CapacityExceeded { requested: usize, remaining: usize },
    #[error("Invalid sprite batch capacity {capacity} (must be between 1 and {max}).")]
    InvalidCapacity { capacity: usize, max: usize },
    #[error("No frame is currently open. Call `begin_frame` first.")]
    NoOpenFrame,
    #[error("A frame is already open. Call `end_frame` first.")]
    FrameAlreadyOpen,
    #[error("Camera view size must be finite and positive.")]
    InvalidViewSize,
    #[error("Swapchain returned {count} images, at most {max} are supported.")]
    TooManySwapchainImages { count: usize, max: usize },
    #[error("Failed to find suitable memory type.")]
    NoSuitableMemoryType,
    #[error("Failed to find suitable physical device.")]
    NoSuitableDevice,
    #[error("Missing required queue families.")]
    MissingQueueFamilies,
}

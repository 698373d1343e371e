use std::fmt;
use std::path::PathBuf;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vulkanalia::vk;

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Upper bound on the presentable images a swapchain may hand back.
pub const MAX_SWAPCHAIN_IMAGE_COUNT: usize = 4;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
pub const ATLAS_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

pub const CLEAR_COLOR: [f32; 4] = [0.01, 0.01, 0.01, 1.0];
pub const CLEAR_DEPTH: f32 = 1.0;

pub const DEFAULT_VERTEX_SHADER: &str = concat!(env!("OUT_DIR"), "/sprite.vert.spv");
pub const DEFAULT_FRAGMENT_SHADER: &str = concat!(env!("OUT_DIR"), "/sprite.frag.spv");
pub const DEFAULT_ATLAS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/textures/atlas.png");

pub const ENGINE_NAME: &[u8] = b"Moss\0";

/// Application name and `(major, minor, patch)` version reported to the driver.
#[derive(Clone, Debug)]
pub struct AppInfo {
    pub name: String,
    pub version: (u32, u32, u32),
}

impl AppInfo {
    pub fn new(name: impl Into<String>, version: (u32, u32, u32)) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub(crate) fn vk_version(&self) -> u32 {
        let (major, minor, patch) = self.version;
        vk::make_version(major, minor, patch)
    }
}

impl Default for AppInfo {
    fn default() -> Self {
        Self::new("Moss Application", (0, 1, 0))
    }
}

pub type FramebufferSizeFn = Box<dyn Fn() -> (u32, u32)>;

/// Everything [`Engine::create`](crate::Engine::create) needs from the host
/// application.
pub struct EngineConfig<'a, W: HasDisplayHandle + HasWindowHandle> {
    pub app_info: AppInfo,
    /// Window the presentation surface is created for.
    pub window: &'a W,
    /// Queried whenever the swapchain is (re)built. Returns pixels.
    pub framebuffer_size: FramebufferSizeFn,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub atlas: PathBuf,
    /// Request the Khronos validation layer. Falls back with a warning when
    /// the layer is not installed.
    pub validation: bool,
}

impl<'a, W: HasDisplayHandle + HasWindowHandle> EngineConfig<'a, W> {
    pub fn new(
        app_info: AppInfo,
        window: &'a W,
        framebuffer_size: impl Fn() -> (u32, u32) + 'static,
    ) -> Self {
        Self {
            app_info,
            window,
            framebuffer_size: Box::new(framebuffer_size),
            vertex_shader: PathBuf::from(DEFAULT_VERTEX_SHADER),
            fragment_shader: PathBuf::from(DEFAULT_FRAGMENT_SHADER),
            atlas: PathBuf::from(DEFAULT_ATLAS),
            validation: cfg!(debug_assertions),
        }
    }

    pub fn with_shaders(mut self, vertex: impl Into<PathBuf>, fragment: impl Into<PathBuf>) -> Self {
        self.vertex_shader = vertex.into();
        self.fragment_shader = fragment.into();
        self
    }

    pub fn with_atlas(mut self, atlas: impl Into<PathBuf>) -> Self {
        self.atlas = atlas.into();
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }
}

impl<W: HasDisplayHandle + HasWindowHandle> fmt::Debug for EngineConfig<'_, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("app_info", &self.app_info)
            .field("vertex_shader", &self.vertex_shader)
            .field("fragment_shader", &self.fragment_shader)
            .field("atlas", &self.atlas)
            .field("validation", &self.validation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_info_packs_version() {
        let info = AppInfo::new("Depth Test", (0, 1, 0));
        assert_eq!(vk::version_major(info.vk_version()), 0);
        assert_eq!(vk::version_minor(info.vk_version()), 1);
        assert_eq!(vk::version_patch(info.vk_version()), 0);
    }

    #[test]
    fn default_shaders_are_build_outputs() {
        assert!(DEFAULT_VERTEX_SHADER.ends_with("sprite.vert.spv"));
        assert!(DEFAULT_FRAGMENT_SHADER.ends_with("sprite.frag.spv"));
    }
}

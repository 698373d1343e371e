use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use crate::error::Error;

/// Orthographic 2D camera stored as the final linear transform
/// `clip = world * scale + offset`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    scale: Vec2,
    offset: Vec2,
}

/// Camera data as laid out in the vertex shader's uniform block.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub scale: [f32; 2],
    pub offset: [f32; 2],
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            scale: Vec2::ONE,
            offset: Vec2::ZERO,
        }
    }
}

impl Camera {
    /// Centers the view on `position` (world units).
    pub fn set_position(&mut self, position: Vec2) {
        self.offset = -position * self.scale;
    }

    /// Sets the visible world area. Y is flipped so world up is screen up.
    /// Both extents must be finite and positive; otherwise the camera is left
    /// unchanged.
    pub fn set_size(&mut self, size: Vec2) -> Result<()> {
        if !(size.is_finite() && size.cmpgt(Vec2::ZERO).all()) {
            return Err(Error::InvalidViewSize.into());
        }

        // Back to world units first so the current position survives.
        self.offset /= self.scale;
        self.scale = Vec2::new(2.0 / size.x, -2.0 / size.y);
        self.offset *= self.scale;
        Ok(())
    }

    pub fn scale(&self) -> Vec2 {
        self.scale
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn to_clip(&self, world: Vec2) -> Vec2 {
        world * self.scale + self.offset
    }

    pub fn uniform(&self) -> CameraUniform {
        CameraUniform {
            scale: self.scale.to_array(),
            offset: self.offset.to_array(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Vec2, b: Vec2) {
        assert!(a.abs_diff_eq(b, 1e-6), "{a:?} != {b:?}");
    }

    #[test]
    fn size_maps_edges_to_clip_space() {
        let mut camera = Camera::default();
        camera.set_size(Vec2::new(960.0, 540.0)).unwrap();
        assert_close(camera.scale(), Vec2::new(2.0 / 960.0, -2.0 / 540.0));
        assert_close(camera.to_clip(Vec2::new(480.0, 270.0)), Vec2::new(1.0, -1.0));
        assert_close(camera.to_clip(Vec2::new(-480.0, -270.0)), Vec2::new(-1.0, 1.0));
    }

    #[test]
    fn position_overwrites_offset() {
        let mut camera = Camera::default();
        camera.set_size(Vec2::new(100.0, 100.0)).unwrap();
        camera.set_position(Vec2::new(10.0, 0.0));
        camera.set_position(Vec2::new(0.0, 20.0));
        assert_close(camera.to_clip(Vec2::new(0.0, 20.0)), Vec2::ZERO);
    }

    #[test]
    fn resize_keeps_position() {
        let position = Vec2::new(37.5, -12.25);
        for first in [Vec2::new(640.0, 360.0), Vec2::new(3.0, 7.0), Vec2::ONE] {
            let second = Vec2::new(960.0, 540.0);
            let mut camera = Camera::default();
            camera.set_size(first).unwrap();
            camera.set_position(position);
            camera.set_size(second).unwrap();

            let mut expected = Camera::default();
            expected.set_size(second).unwrap();
            assert_close(camera.offset(), -position * expected.scale());
        }
    }

    #[test]
    fn uniform_matches_transform() {
        let mut camera = Camera::default();
        camera.set_size(Vec2::new(4.0, 2.0)).unwrap();
        camera.set_position(Vec2::new(1.0, 1.0));
        let uniform = camera.uniform();
        assert_eq!(uniform.scale, [0.5, -1.0]);
        assert_eq!(uniform.offset, [-0.5, 1.0]);
        assert_eq!(bytemuck::bytes_of(&uniform).len(), 16);
    }

    #[test]
    fn degenerate_size_is_rejected() {
        let mut camera = Camera::default();
        camera.set_size(Vec2::new(100.0, 50.0)).unwrap();
        camera.set_position(Vec2::new(10.0, 5.0));
        let before = camera;

        for size in [
            Vec2::new(0.0, 50.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(-1.0, 50.0),
            Vec2::new(f32::INFINITY, 50.0),
            Vec2::new(100.0, f32::NAN),
        ] {
            let error = camera.set_size(size).unwrap_err();
            assert_eq!(error.downcast_ref::<Error>(), Some(&Error::InvalidViewSize));
            assert_eq!(camera, before);
        }

        camera.set_size(Vec2::new(200.0, 100.0)).unwrap();
        assert_close(camera.to_clip(Vec2::new(10.0, 5.0)), Vec2::ZERO);
    }
}

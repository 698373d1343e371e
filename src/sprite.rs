use glam::Vec2;

use crate::vertex::Vertex;

pub const VERTICES_PER_SPRITE: usize = 4;
pub const INDICES_PER_SPRITE: usize = 6;

/// Two triangles per quad, relative to the quad's first vertex.
pub const QUAD_INDICES: [u16; INDICES_PER_SPRITE] = [0, 1, 2, 2, 3, 0];

/// Region of the texture atlas, in normalized UV coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UvRect {
    pub top_left: Vec2,
    pub bottom_right: Vec2,
}

impl UvRect {
    pub const FULL: Self = Self {
        top_left: Vec2::ZERO,
        bottom_right: Vec2::ONE,
    };

    pub const fn new(top_left: Vec2, bottom_right: Vec2) -> Self {
        Self {
            top_left,
            bottom_right,
        }
    }
}

impl Default for UvRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// A textured quad to be baked into a [`SpriteBatch`](crate::SpriteBatch).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sprite {
    /// World-space center.
    pub position: Vec2,
    /// World-space width and height.
    pub size: Vec2,
    /// In `[0, 1]`. Lower values are drawn in front.
    pub depth: f32,
    pub uv: UvRect,
}

impl Sprite {
    pub fn new(position: Vec2, size: Vec2, depth: f32) -> Self {
        Self {
            position,
            size,
            depth,
            uv: UvRect::FULL,
        }
    }

    pub fn with_uv(mut self, uv: UvRect) -> Self {
        self.uv = uv;
        self
    }

    /// Corners in top-left, top-right, bottom-right, bottom-left order.
    pub fn vertices(&self) -> [Vertex; VERTICES_PER_SPRITE] {
        let half = self.size * 0.5;
        let (left, right) = (self.position.x - half.x, self.position.x + half.x);
        let (bottom, top) = (self.position.y - half.y, self.position.y + half.y);
        let UvRect {
            top_left: uv0,
            bottom_right: uv1,
        } = self.uv;

        [
            Vertex::new([left, top, self.depth], [uv0.x, uv0.y]),
            Vertex::new([right, top, self.depth], [uv1.x, uv0.y]),
            Vertex::new([right, bottom, self.depth], [uv1.x, uv1.y]),
            Vertex::new([left, bottom, self.depth], [uv0.x, uv1.y]),
        ]
    }
}

pub fn quad_indices(base_vertex: u16) -> [u16; INDICES_PER_SPRITE] {
    QUAD_INDICES.map(|index| base_vertex + index)
}

use glam::{Vec2, Vec3};

/// Inclusive rectangle of height samples currently drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawExtent {
    pub lo_x: i32,
    pub lo_y: i32,
    pub hi_x: i32,
    pub hi_y: i32,
}

impl DrawExtent {
    pub fn new(lo_x: i32, lo_y: i32, hi_x: i32, hi_y: i32) -> Self {
        Self {
            lo_x,
            lo_y,
            hi_x,
            hi_y,
        }
    }
}

/// Terrain query service the shadow and decal passes tessellate against.
///
/// Samples are addressed in grid space. Sample `(x, y)` sits at world
/// `((x - border) * cell_size, (y - border) * cell_size, height(x, y))`;
/// the terrain is Z up.
pub trait HeightField {
    fn cell_size(&self) -> f32;

    fn border_size(&self) -> i32;

    /// Sample count along x.
    fn x_extent(&self) -> i32;

    /// Sample count along y.
    fn y_extent(&self) -> i32;

    fn draw_extent(&self) -> DrawExtent;

    /// Height of sample `(x, y)`. Out-of-range samples clamp to the edge.
    fn height(&self, x: i32, y: i32) -> f32;

    /// Whether the cell whose lower-left sample is `(x, y)` is split along
    /// the other diagonal.
    fn flip_state(&self, x: i32, y: i32) -> bool;

    fn world_x(&self, x: i32) -> f32 {
        (x - self.border_size()) as f32 * self.cell_size()
    }

    fn world_y(&self, y: i32) -> f32 {
        (y - self.border_size()) as f32 * self.cell_size()
    }

    /// Grid-space coordinate of a world position (fractional).
    fn to_grid(&self, world: Vec2) -> Vec2 {
        world / self.cell_size() + Vec2::splat(self.border_size() as f32)
    }

    /// Bilinear height at a world position.
    fn height_at(&self, world: Vec2) -> f32 {
        let grid = self.to_grid(world);
        let x0 = grid.x.floor();
        let y0 = grid.y.floor();
        let fx = grid.x - x0;
        let fy = grid.y - y0;
        let (x0, y0) = (x0 as i32, y0 as i32);

        let h00 = self.height(x0, y0);
        let h10 = self.height(x0 + 1, y0);
        let h01 = self.height(x0, y0 + 1);
        let h11 = self.height(x0 + 1, y0 + 1);
        let bottom = h00 + (h10 - h00) * fx;
        let top = h01 + (h11 - h01) * fx;
        bottom + (top - bottom) * fy
    }

    /// Surface normal at a world position from central differences.
    fn normal_at(&self, world: Vec2) -> Vec3 {
        let step = self.cell_size();
        let dx = self.height_at(world + Vec2::new(step, 0.0))
            - self.height_at(world - Vec2::new(step, 0.0));
        let dy = self.height_at(world + Vec2::new(0.0, step))
            - self.height_at(world - Vec2::new(0.0, step));
        Vec3::new(-dx, -dy, 2.0 * step).normalize_or(Vec3::Z)
    }
}

/// In-memory height field backed by a flat sample array.
#[derive(Debug, Clone)]
pub struct GridHeightField {
    width: i32,
    height: i32,
    border: i32,
    cell_size: f32,
    heights: Vec<f32>,
    flips: Vec<bool>,
    draw_extent: DrawExtent,
}

impl GridHeightField {
    /// Flat field of `width * height` samples at `base_height`, fully drawn.
    pub fn flat(width: i32, height: i32, cell_size: f32, base_height: f32) -> Self {
        let count = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            border: 0,
            cell_size,
            heights: vec![base_height; count],
            flips: vec![false; count],
            draw_extent: DrawExtent::new(0, 0, width - 1, height - 1),
        }
    }

    /// Field sampled from `f(world_x, world_y)`.
    pub fn from_fn(
        width: i32,
        height: i32,
        cell_size: f32,
        mut f: impl FnMut(f32, f32) -> f32,
    ) -> Self {
        let mut field = Self::flat(width, height, cell_size, 0.0);
        for y in 0..height {
            for x in 0..width {
                let h = f(field.world_x(x), field.world_y(y));
                field.set_height(x, y, h);
            }
        }
        field
    }

    pub fn with_border(mut self, border: i32) -> Self {
        self.border = border;
        self
    }

    pub fn set_draw_extent(&mut self, extent: DrawExtent) {
        self.draw_extent = extent;
    }

    pub fn set_height(&mut self, x: i32, y: i32, h: f32) {
        if let Some(i) = self.slot(x, y) {
            self.heights[i] = h;
        }
    }

    pub fn set_flip(&mut self, x: i32, y: i32, flip: bool) {
        if let Some(i) = self.slot(x, y) {
            self.flips[i] = flip;
        }
    }

    fn slot(&self, x: i32, y: i32) -> Option<usize> {
        (x >= 0 && y >= 0 && x < self.width && y < self.height)
            .then(|| (y * self.width + x) as usize)
    }

    fn clamped_slot(&self, x: i32, y: i32) -> Option<usize> {
        if self.width <= 0 || self.height <= 0 {
            return None;
        }
        self.slot(x.clamp(0, self.width - 1), y.clamp(0, self.height - 1))
    }
}

impl HeightField for GridHeightField {
    fn cell_size(&self) -> f32 {
        self.cell_size
    }

    fn border_size(&self) -> i32 {
        self.border
    }

    fn x_extent(&self) -> i32 {
        self.width
    }

    fn y_extent(&self) -> i32 {
        self.height
    }

    fn draw_extent(&self) -> DrawExtent {
        self.draw_extent
    }

    fn height(&self, x: i32, y: i32) -> f32 {
        self.clamped_slot(x, y).map_or(0.0, |i| self.heights[i])
    }

    fn flip_state(&self, x: i32, y: i32) -> bool {
        self.slot(x, y).is_some_and(|i| self.flips[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_and_grid_space_agree() {
        let field = GridHeightField::flat(16, 16, 10.0, 0.0).with_border(2);
        assert_eq!(field.world_x(2), 0.0);
        assert_eq!(field.world_y(5), 30.0);
        assert_eq!(field.to_grid(Vec2::new(0.0, 30.0)), Vec2::new(2.0, 5.0));
    }

    #[test]
    fn bilinear_height_and_slope_normal() {
        let field = GridHeightField::from_fn(8, 8, 1.0, |x, _| x * 0.5);
        assert!((field.height_at(Vec2::new(2.5, 3.0)) - 1.25).abs() < 1e-6);

        let n = field.normal_at(Vec2::new(3.0, 3.0));
        let expected = Vec3::new(-0.5, 0.0, 1.0).normalize();
        assert!(n.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn out_of_range_samples_clamp() {
        let mut field = GridHeightField::flat(4, 4, 1.0, 0.0);
        field.set_height(3, 0, 7.0);
        assert_eq!(field.height(10, -3), 7.0);
        assert!(!field.flip_state(-1, 0));
    }
}

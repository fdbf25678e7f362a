use glam::{Vec2, Vec3};

use crate::renderer::buffers::ScratchBuffer;
use crate::renderer::Vertex;
use crate::scene::HeightField;

/// Inclusive range of height samples to tessellate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl CellRect {
    /// Samples covering a world-space rectangle, clipped to the height field
    /// and to what the terrain currently draws. `None` when less than one
    /// cell survives on either axis.
    pub fn from_world(terrain: &dyn HeightField, min: Vec2, max: Vec2) -> Option<Self> {
        let lo = terrain.to_grid(min).floor();
        let hi = terrain.to_grid(max).ceil();
        let extent = terrain.draw_extent();

        let rect = Self {
            x0: (lo.x as i32).max(extent.lo_x).max(0),
            y0: (lo.y as i32).max(extent.lo_y).max(0),
            x1: (hi.x as i32).min(extent.hi_x).min(terrain.x_extent() - 1),
            y1: (hi.y as i32).min(extent.hi_y).min(terrain.y_extent() - 1),
        };
        (rect.cells_x() >= 1 && rect.cells_y() >= 1).then_some(rect)
    }

    pub fn cells_x(&self) -> i32 {
        self.x1 - self.x0
    }

    pub fn cells_y(&self) -> i32 {
        self.y1 - self.y0
    }

    pub fn vertices_per_row(&self) -> usize {
        (self.cells_x() + 1) as usize
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices_per_row() * (self.cells_y() + 1) as usize
    }

    pub fn index_count(&self) -> usize {
        (self.cells_x() * self.cells_y()) as usize * 6
    }

    /// Shrink both axes to at most `max_cells`, taking half the excess from
    /// each end (the extra cell of an odd excess from the far end).
    pub fn trimmed(self, max_cells: i32) -> Self {
        let (x0, x1) = trim_axis(self.x0, self.x1, max_cells);
        let (y0, y1) = trim_axis(self.y0, self.y1, max_cells);
        Self { x0, y0, x1, y1 }
    }
}

fn trim_axis(lo: i32, hi: i32, max_cells: i32) -> (i32, i32) {
    let excess = hi - lo - max_cells;
    if excess <= 0 {
        return (lo, hi);
    }
    let front = excess / 2;
    (lo + front, hi - (excess - front))
}

/// Write one vertex per sample of `rect` and two triangles per cell.
///
/// Cells flagged by the height field are split along the other diagonal.
/// The caller has checked that the vertices and indices fit.
pub fn tessellate(
    scratch: &mut ScratchBuffer,
    terrain: &dyn HeightField,
    rect: CellRect,
    mut vertex: impl FnMut(Vec3) -> Vertex,
) {
    let base = scratch.base_vertex();
    for y in rect.y0..=rect.y1 {
        for x in rect.x0..=rect.x1 {
            let position = Vec3::new(terrain.world_x(x), terrain.world_y(y), terrain.height(x, y));
            scratch.push_vertex(vertex(position));
        }
    }

    let row = rect.vertices_per_row() as u16;
    for cy in 0..rect.cells_y() {
        for cx in 0..rect.cells_x() {
            let a = base + cy as u16 * row + cx as u16;
            let b = a + 1;
            let d = a + row;
            let c = d + 1;
            if terrain.flip_state(rect.x0 + cx, rect.y0 + cy) {
                scratch.push_triangle(a, b, d);
                scratch.push_triangle(b, c, d);
            } else {
                scratch.push_triangle(a, b, c);
                scratch.push_triangle(a, c, d);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{ScratchBufferPool, ScratchKind};
    use crate::scene::{DrawExtent, GridHeightField};

    #[test]
    fn trimming_takes_half_the_excess_from_each_end() {
        let rect = CellRect {
            x0: 10,
            y0: 0,
            x1: 140,
            y1: 50,
        };
        let trimmed = rect.trimmed(104);
        assert_eq!((trimmed.x0, trimmed.x1), (23, 127));
        assert_eq!(trimmed.cells_x(), 104);
        assert_eq!(trimmed.cells_y(), 50);

        let odd = CellRect { x1: 141, ..rect }.trimmed(104);
        assert_eq!((odd.x0, odd.x1), (23, 127));
    }

    #[test]
    fn rectangles_clip_to_draw_extent() {
        let mut terrain = GridHeightField::flat(64, 64, 10.0, 0.0);
        terrain.set_draw_extent(DrawExtent::new(8, 8, 40, 40));

        let rect = CellRect::from_world(&terrain, Vec2::new(-100.0, 95.0), Vec2::new(115.0, 1000.0))
            .unwrap();
        assert_eq!(rect, CellRect { x0: 8, y0: 9, x1: 12, y1: 40 });

        assert!(CellRect::from_world(&terrain, Vec2::new(500.0, 0.0), Vec2::new(900.0, 10.0)).is_none());
    }

    #[test]
    fn rectangles_clip_to_the_height_field_when_the_extent_is_wider() {
        let mut terrain = GridHeightField::flat(16, 16, 1.0, 0.0);
        terrain.set_draw_extent(DrawExtent::new(-10, -10, 100, 100));

        let rect = CellRect::from_world(&terrain, Vec2::new(-5.0, 12.0), Vec2::new(4.0, 30.0))
            .unwrap();
        assert_eq!(rect, CellRect { x0: 0, y0: 12, x1: 4, y1: 15 });

        assert!(CellRect::from_world(&terrain, Vec2::new(15.5, 2.0), Vec2::new(20.0, 4.0)).is_none());
    }

    #[test]
    fn flipped_cells_use_the_other_diagonal() {
        let mut terrain = GridHeightField::flat(4, 4, 1.0, 0.0);
        terrain.set_flip(1, 0, true);
        let mut pool = ScratchBufferPool::default();
        let scratch = pool.get_mut(ScratchKind::TerrainShadow);
        let rect = CellRect { x0: 0, y0: 0, x1: 2, y1: 1 };
        tessellate(scratch, &terrain, rect, |p| Vertex {
            position: p.to_array(),
            ..Vertex::default()
        });

        assert_eq!(scratch.vertex_count(), rect.vertex_count());
        assert_eq!(scratch.indices(), &[0, 1, 4, 0, 4, 3, 1, 2, 4, 2, 5, 4]);
    }
}

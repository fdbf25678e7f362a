use glam::Vec3;

use crate::asset::{Arena, Handle};
use crate::renderer::buffers::{ScratchBufferPool, ScratchKind, MAX_INDICES_PER_BATCH};
use crate::renderer::device::{GraphicsDevice, IndexedDraw};
use crate::renderer::error::RenderError;
use crate::renderer::sort::{triangle_depth, TempIndex, TriangleSorter};
use crate::renderer::state::{DrawState, IndexStream, RenderState, VertexStream};
use crate::renderer::Vertex;
use crate::scene::Sphere;
use crate::settings::SortingSettings;

/// One submitted triangle range and the state it must be drawn with.
#[derive(Debug, Clone)]
pub struct SortingNode {
    pub state: RenderState,
    /// Object-space bounds; the centre decides the node's list position.
    pub bounding_sphere: Sphere,
    pub start_index: u32,
    pub polygon_count: u32,
    pub min_vertex_index: u32,
    pub vertex_count: u32,
}

impl SortingNode {
    fn index_range(&self) -> std::ops::Range<usize> {
        let start = (self.state.index_offset + self.start_index) as usize;
        start..start + self.polygon_count as usize * 3
    }

    fn vertex_range(&self) -> std::ops::Range<usize> {
        let start = (self.state.vertex_offset + self.min_vertex_index) as usize;
        start..start + self.vertex_count as usize
    }

    /// CPU-side geometry of a node backed by sorting streams.
    fn sorting_geometry(&self) -> Option<(&[Vertex], &[u16])> {
        match (&self.state.vertices, &self.state.indices) {
            (VertexStream::Sorting { vertices, .. }, IndexStream::Sorting { indices, .. }) => {
                Some((&vertices[..], &indices[..]))
            }
            _ => None,
        }
    }

    fn validate_sorting_ranges(&self) -> Result<(), RenderError> {
        let Some((vertices, indices)) = self.sorting_geometry() else {
            return Ok(());
        };
        let index_range = self.index_range();
        if index_range.end > indices.len() {
            return Err(RenderError::BufferOverflow {
                requested: index_range.end,
                capacity: indices.len(),
            });
        }
        let vertex_range = self.vertex_range();
        if vertex_range.end > vertices.len() {
            return Err(RenderError::BufferOverflow {
                requested: vertex_range.end,
                capacity: vertices.len(),
            });
        }
        let min = self.min_vertex_index;
        let end = min + self.vertex_count;
        if let Some(&index) = indices[index_range]
            .iter()
            .find(|&&i| (i as u32) < min || (i as u32) >= end)
        {
            return Err(RenderError::IndexOutOfRange {
                index: index as u32,
                min,
                end,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Queued,
    /// Sorting is switched off; the node was discarded.
    Disabled,
    /// No triangles or no vertices.
    Empty,
    /// Invalid ranges or streams of mixed storage classes.
    Rejected,
    /// The overlap pool is full until the next flush; the node was released
    /// and must not be resubmitted this frame.
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub immediate_draws: u32,
    pub sorted_draws: u32,
    pub sorted_triangles: u32,
    /// Overlap nodes that did not fit the configured ceilings.
    pub dropped_nodes: u32,
    pub state_changes: u32,
    pub non_finite_depths: u32,
}

struct PooledNode {
    node: SortingNode,
    view_center: Vec3,
    next: Option<Handle<PooledNode>>,
}

impl PooledNode {
    /// Larger is further from the camera.
    fn depth_order(&self) -> f32 {
        -self.view_center.z
    }
}

/// A contiguous stretch of sorted triangles that share an origin node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeRun {
    node: u16,
    start: usize,
    len: usize,
}

struct NodeRuns<'a> {
    keys: &'a [TempIndex],
    pos: usize,
}

impl<'a> NodeRuns<'a> {
    fn new(keys: &'a [TempIndex]) -> Self {
        Self { keys, pos: 0 }
    }
}

impl Iterator for NodeRuns<'_> {
    type Item = NodeRun;

    fn next(&mut self) -> Option<NodeRun> {
        let first = self.keys.get(self.pos)?;
        let start = self.pos;
        let mut end = start + 1;
        while end < self.keys.len() && self.keys[end].node == first.node {
            end += 1;
        }
        self.pos = end;
        Some(NodeRun {
            node: first.node,
            start,
            len: end - start,
        })
    }
}

struct OverlapEntry {
    handle: Handle<PooledNode>,
    /// First vertex of the node inside the combined sorting buffer.
    base: u16,
}

/// Defers translucent triangle ranges until the end of the frame.
///
/// Nodes are kept in a list ordered far to near. On flush, nodes backed by
/// device buffers are drawn in that order; nodes backed by sorting streams are
/// merged, sorted per triangle and drawn in runs of equal origin.
pub struct SortingPool {
    settings: SortingSettings,
    nodes: Arena<PooledNode>,
    head: Option<Handle<PooledNode>>,
    enabled: bool,
    sorter: TriangleSorter,
    overlap: Vec<OverlapEntry>,
    budget: OverlapBudget,
}

/// Running totals of the sorting-backed nodes queued since the last flush.
#[derive(Debug, Default)]
struct OverlapBudget {
    nodes: usize,
    vertices: usize,
    polygons: usize,
    /// Set by the first node that did not fit; everything after it is dropped.
    full: bool,
    dropped: u32,
}

impl OverlapBudget {
    fn admit(&mut self, node: &SortingNode, limits: &SortingSettings) -> bool {
        let vertices = self.vertices + node.vertex_count as usize;
        let polygons = self.polygons + node.polygon_count as usize;
        if self.full
            || self.nodes >= limits.max_overlapping_nodes
            || vertices > limits.max_overlapping_vertices
            || polygons > limits.max_overlapping_polygons
        {
            self.full = true;
            self.dropped += 1;
            return false;
        }
        self.nodes += 1;
        self.vertices = vertices;
        self.polygons = polygons;
        true
    }
}

impl SortingPool {
    pub fn new(settings: SortingSettings) -> Self {
        let settings = settings.validate();
        Self {
            nodes: Arena::with_capacity(settings.max_overlapping_nodes),
            sorter: TriangleSorter::with_capacity(settings.max_overlapping_polygons),
            overlap: Vec::with_capacity(settings.max_overlapping_nodes),
            settings,
            head: None,
            enabled: true,
            budget: OverlapBudget::default(),
        }
    }

    pub fn settings(&self) -> &SortingSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling also discards everything still pending.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled && !enabled {
            self.clear();
        }
        self.enabled = enabled;
    }

    pub fn pending(&self) -> usize {
        self.nodes.len()
    }

    /// Pending nodes, far to near.
    pub fn queued(&self) -> impl Iterator<Item = &SortingNode> {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let pooled = self.nodes.get(cursor?)?;
            cursor = pooled.next;
            Some(&pooled.node)
        })
    }

    pub fn submit(&mut self, node: SortingNode) -> SubmitStatus {
        if !self.enabled {
            return SubmitStatus::Disabled;
        }
        if node.polygon_count == 0 || node.vertex_count == 0 {
            return SubmitStatus::Empty;
        }
        if node.state.is_mixed() {
            log::warn!("Rejected sorting node mixing sorting and device streams");
            return SubmitStatus::Rejected;
        }
        if let Err(err) = node.validate_sorting_ranges() {
            log::warn!("Rejected sorting node: {}", err);
            return SubmitStatus::Rejected;
        }
        if node.state.is_sorting() && !self.budget.admit(&node, &self.settings) {
            log::error!(
                "Overlap pool full ({} nodes, {} vertices, {} polygons); dropping node",
                self.budget.nodes,
                self.budget.vertices,
                self.budget.polygons
            );
            return SubmitStatus::Dropped;
        }

        let world_view = node.state.draw.world_view();
        let view_center = world_view.transform_point3(node.bounding_sphere.center);
        let pooled = PooledNode {
            node,
            view_center,
            next: None,
        };
        let order = pooled.depth_order();

        // Walk to the first node strictly nearer than the new one.
        let mut prev: Option<Handle<PooledNode>> = None;
        let mut cursor = self.head;
        while let Some(handle) = cursor {
            let Some(existing) = self.nodes.get(handle) else {
                break;
            };
            if existing.depth_order() < order {
                break;
            }
            prev = Some(handle);
            cursor = existing.next;
        }

        let handle = self.nodes.insert(PooledNode {
            next: cursor,
            ..pooled
        });
        match prev.and_then(|p| self.nodes.get_mut(p)) {
            Some(prev) => prev.next = Some(handle),
            None => self.head = Some(handle),
        }
        SubmitStatus::Queued
    }

    /// Drop every pending node without drawing.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.head = None;
        self.overlap.clear();
        self.sorter.clear();
        self.budget = OverlapBudget::default();
    }

    /// Draw everything submitted since the last flush.
    ///
    /// The device state in effect before the call is restored afterwards and
    /// the pool is empty on return, whether or not a draw failed.
    pub fn flush(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scratch: &mut ScratchBufferPool,
    ) -> Result<FlushStats, RenderError> {
        let mut stats = FlushStats {
            dropped_nodes: self.budget.dropped,
            ..FlushStats::default()
        };
        if self.head.is_none() {
            self.budget = OverlapBudget::default();
            return Ok(stats);
        }

        let saved = *device.current_state();
        let mut last_state: Option<DrawState> = None;

        self.draw_immediate(device, &mut stats, &mut last_state);
        let result = self.draw_overlap(device, scratch, &mut stats, &mut last_state);

        device.apply_state(&saved);
        self.clear();
        result.map(|()| stats)
    }

    fn draw_immediate(
        &mut self,
        device: &mut dyn GraphicsDevice,
        stats: &mut FlushStats,
        last_state: &mut Option<DrawState>,
    ) {
        let limits = &self.settings;
        let mut overlap_vertices = 0usize;
        let mut overlap_polygons = 0usize;

        let mut cursor = self.head;
        while let Some(handle) = cursor {
            let Some(pooled) = self.nodes.get(handle) else {
                break;
            };
            cursor = pooled.next;
            let node = &pooled.node;

            // Backstop for the ceilings `submit` already enforces.
            if node.state.is_sorting() {
                let vertices = overlap_vertices + node.vertex_count as usize;
                let polygons = overlap_polygons + node.polygon_count as usize;
                if self.overlap.len() >= limits.max_overlapping_nodes
                    || vertices > limits.max_overlapping_vertices
                    || polygons > limits.max_overlapping_polygons
                {
                    log::error!(
                        "Overlap pool full ({} nodes, {} vertices, {} polygons); dropping node",
                        self.overlap.len(),
                        overlap_vertices,
                        overlap_polygons
                    );
                    stats.dropped_nodes += 1;
                    continue;
                }
                overlap_vertices = vertices;
                overlap_polygons = polygons;
                self.overlap.push(OverlapEntry { handle, base: 0 });
                continue;
            }

            let (VertexStream::Device { buffer: vb, .. }, IndexStream::Device { buffer: ib, .. }) =
                (&node.state.vertices, &node.state.indices)
            else {
                continue;
            };

            apply_if_changed(device, &node.state.draw, last_state, stats);
            let draw = IndexedDraw {
                first_index: node.state.index_offset + node.start_index,
                triangle_count: node.polygon_count,
                min_vertex: node.min_vertex_index,
                vertex_count: node.vertex_count,
                base_vertex: node.state.vertex_offset,
            };
            match device
                .bind_buffers(*vb, *ib)
                .and_then(|()| device.draw_indexed(draw))
            {
                Ok(()) => stats.immediate_draws += 1,
                Err(err) => log::warn!("Immediate sorting draw failed: {}", err),
            }
        }
    }

    fn draw_overlap(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scratch: &mut ScratchBufferPool,
        stats: &mut FlushStats,
        last_state: &mut Option<DrawState>,
    ) -> Result<(), RenderError> {
        if self.overlap.is_empty() {
            return Ok(());
        }

        let (mut vertex_demand, mut polygon_demand) = (0usize, 0usize);
        for entry in &self.overlap {
            if let Some(pooled) = self.nodes.get(entry.handle) {
                vertex_demand += pooled.node.vertex_count as usize;
                polygon_demand += pooled.node.polygon_count as usize;
            }
        }

        let buffer = scratch.get_mut(ScratchKind::SortingTemp);
        buffer.clear();
        let default_vertices = self.settings.default_sorting_vertex_count;
        if !buffer.ensure_capacity(
            vertex_demand.max(default_vertices),
            (polygon_demand * 3).max((default_vertices * 3).min(MAX_INDICES_PER_BATCH)),
        ) {
            stats.dropped_nodes += self.overlap.len() as u32;
            return Err(RenderError::BufferOverflow {
                requested: vertex_demand,
                capacity: buffer.capacity().vertices,
            });
        }

        self.sorter.clear();
        self.sorter.reserve(polygon_demand);
        for (slot, entry) in self.overlap.iter_mut().enumerate() {
            let Some(pooled) = self.nodes.get(entry.handle) else {
                continue;
            };
            let node = &pooled.node;
            let Some((vertices, indices)) = node.sorting_geometry() else {
                continue;
            };

            entry.base = buffer.base_vertex();
            let source = &vertices[node.vertex_range()];
            buffer.extend_vertices(source);

            let world_view = node.state.draw.world_view();
            let min = node.min_vertex_index as u16;
            for tri in indices[node.index_range()].chunks_exact(3) {
                let local = [tri[0] - min, tri[1] - min, tri[2] - min];
                let position = |i: u16| Vec3::from(source[i as usize].position);
                let z = triangle_depth(
                    &world_view,
                    position(local[0]),
                    position(local[1]),
                    position(local[2]),
                );
                self.sorter.push(
                    [
                        entry.base + local[0],
                        entry.base + local[1],
                        entry.base + local[2],
                    ],
                    slot as u16,
                    z,
                );
            }
        }

        self.sorter.sort();
        for key in self.sorter.keys() {
            buffer.extend_indices(&key.tri);
        }
        stats.non_finite_depths += self.sorter.non_finite() as u32;

        let Some(batch) = buffer.upload(device)? else {
            return Ok(());
        };
        device.bind_buffers(batch.vertex_buffer, batch.index_buffer)?;

        for run in NodeRuns::new(self.sorter.keys()) {
            let Some(entry) = self.overlap.get(run.node as usize) else {
                continue;
            };
            let Some(pooled) = self.nodes.get(entry.handle) else {
                continue;
            };
            apply_if_changed(device, &pooled.node.state.draw, last_state, stats);
            device.draw_indexed(IndexedDraw {
                first_index: batch.first_index + run.start as u32 * 3,
                triangle_count: run.len as u32,
                min_vertex: entry.base as u32,
                vertex_count: pooled.node.vertex_count,
                base_vertex: batch.base_vertex,
            })?;
            stats.sorted_draws += 1;
            stats.sorted_triangles += run.len as u32;
        }
        Ok(())
    }
}

impl Default for SortingPool {
    fn default() -> Self {
        Self::new(SortingSettings::default())
    }
}

fn apply_if_changed(
    device: &mut dyn GraphicsDevice,
    state: &DrawState,
    last: &mut Option<DrawState>,
    stats: &mut FlushStats,
) {
    if last.as_ref() != Some(state) {
        device.apply_state(state);
        stats.state_changes += 1;
        *last = Some(*state);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::renderer::device::{BufferUsage, MapMode};
    use crate::renderer::draw::BlendMode;
    use crate::renderer::state::ShaderState;
    use crate::renderer::vertex::v;
    use crate::renderer::{HeadlessDevice, MaterialId};
    use glam::Mat4;

    fn triangle_node(z: f32, material: u32) -> SortingNode {
        let vertices: Rc<[Vertex]> = Rc::from(vec![
            v([0.0, 0.0, z], 0, [0.0, 0.0]),
            v([1.0, 0.0, z], 0, [1.0, 0.0]),
            v([0.0, 1.0, z], 0, [0.0, 1.0]),
        ]);
        let indices: Rc<[u16]> = Rc::from(vec![0u16, 1, 2]);
        SortingNode {
            state: RenderState {
                draw: DrawState {
                    shader: ShaderState::translucent(BlendMode::Alpha),
                    material: MaterialId(material),
                    ..DrawState::default()
                },
                vertices: VertexStream::Sorting {
                    vertices,
                    dynamic: true,
                },
                indices: IndexStream::Sorting {
                    indices,
                    dynamic: true,
                },
                vertex_offset: 0,
                index_offset: 0,
            },
            bounding_sphere: Sphere::new(Vec3::new(0.3, 0.3, z), 1.0),
            start_index: 0,
            polygon_count: 1,
            min_vertex_index: 0,
            vertex_count: 3,
        }
    }

    #[test]
    fn list_is_ordered_far_to_near_with_ties_after() {
        let mut pool = SortingPool::default();
        for (z, material) in [(5.0, 0), (1.0, 1), (3.0, 2), (3.0, 3)] {
            assert_eq!(pool.submit(triangle_node(z, material)), SubmitStatus::Queued);
        }
        let order: Vec<u32> = pool.queued().map(|n| n.state.draw.material.0).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn empty_disabled_and_invalid_nodes_are_not_queued() {
        let mut pool = SortingPool::default();
        let mut empty = triangle_node(1.0, 0);
        empty.polygon_count = 0;
        assert_eq!(pool.submit(empty), SubmitStatus::Empty);

        let mut out_of_range = triangle_node(1.0, 0);
        out_of_range.vertex_count = 2;
        assert_eq!(pool.submit(out_of_range), SubmitStatus::Rejected);

        pool.set_enabled(false);
        assert_eq!(pool.submit(triangle_node(1.0, 0)), SubmitStatus::Disabled);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn device_nodes_draw_immediately_and_state_is_restored() {
        let mut device = HeadlessDevice::new();
        let mut scratch = ScratchBufferPool::default();
        let vb = device.create_vertex_buffer(3, BufferUsage::Static).unwrap();
        let ib = device.create_index_buffer(3, BufferUsage::Static).unwrap();
        device
            .write_vertices(vb, 0, &[Vertex::default(); 3], MapMode::Discard)
            .unwrap();
        device.write_indices(ib, 0, &[0, 1, 2], MapMode::Discard).unwrap();

        let mut node = triangle_node(2.0, 9);
        node.state.vertices = VertexStream::Device {
            buffer: vb,
            dynamic: false,
        };
        node.state.indices = IndexStream::Device {
            buffer: ib,
            dynamic: false,
        };

        let mut pool = SortingPool::default();
        pool.submit(node);
        let before = *device.current_state();
        let stats = pool.flush(&mut device, &mut scratch).unwrap();

        assert_eq!(stats.immediate_draws, 1);
        assert_eq!(stats.sorted_draws, 0);
        assert_eq!(device.draws()[0].state.material, MaterialId(9));
        assert_eq!(*device.current_state(), before);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn full_overlap_pool_drops_later_submissions() {
        let settings = SortingSettings {
            max_overlapping_nodes: 2,
            ..SortingSettings::default()
        };
        let mut pool = SortingPool::new(settings);
        let mut device = HeadlessDevice::new();
        let mut scratch = ScratchBufferPool::default();

        let statuses: Vec<_> = [(3.0, 1), (2.0, 2), (1.0, 3)]
            .into_iter()
            .map(|(z, material)| pool.submit(triangle_node(z, material)))
            .collect();
        assert_eq!(
            statuses,
            vec![SubmitStatus::Queued, SubmitStatus::Queued, SubmitStatus::Dropped]
        );
        assert_eq!(pool.pending(), 2);

        let stats = pool.flush(&mut device, &mut scratch).unwrap();
        assert_eq!(stats.dropped_nodes, 1);
        assert_eq!(stats.sorted_triangles, 2);
        let mut drawn: Vec<u32> = device.draws().iter().map(|d| d.state.material.0).collect();
        drawn.sort_unstable();
        assert_eq!(drawn, vec![1, 2]);

        // The budget resets with the flush.
        assert_eq!(pool.submit(triangle_node(1.0, 3)), SubmitStatus::Queued);
    }

    #[test]
    fn once_full_smaller_nodes_are_dropped_too() {
        let settings = SortingSettings {
            max_overlapping_polygons: 2,
            ..SortingSettings::default()
        };
        let mut pool = SortingPool::new(settings);
        let mut pair = triangle_node(1.0, 1);
        let vertices: Rc<[Vertex]> = Rc::from(vec![Vertex::default(); 3]);
        pair.state.vertices = VertexStream::Sorting {
            vertices,
            dynamic: true,
        };
        pair.state.indices = IndexStream::Sorting {
            indices: Rc::from(vec![0u16, 1, 2, 0, 2, 1, 1, 2, 0]),
            dynamic: true,
        };
        pair.polygon_count = 3;

        assert_eq!(pool.submit(triangle_node(2.0, 0)), SubmitStatus::Queued);
        assert_eq!(pool.submit(pair), SubmitStatus::Dropped);
        assert_eq!(pool.submit(triangle_node(3.0, 2)), SubmitStatus::Dropped);
        assert_eq!(pool.pending(), 1);
    }

    #[test]
    fn runs_follow_sorted_triangles() {
        let keys: Vec<TempIndex> = [0u16, 0, 1, 0, 0]
            .iter()
            .map(|&node| TempIndex {
                tri: [0, 1, 2],
                node,
                z: 0.0,
            })
            .collect();
        let runs: Vec<_> = NodeRuns::new(&keys).map(|r| (r.node, r.start, r.len)).collect();
        assert_eq!(runs, vec![(0, 0, 2), (1, 2, 1), (0, 3, 2)]);
    }

    #[test]
    fn nodes_transform_depth_through_world_view() {
        // Near in object space, pushed far by its world matrix.
        let mut pool = SortingPool::default();
        let mut moved = triangle_node(10.0, 1);
        moved.state.draw.world = Mat4::from_translation(Vec3::new(0.0, 0.0, -20.0));
        pool.submit(moved);
        pool.submit(triangle_node(0.0, 2));
        let order: Vec<u32> = pool.queued().map(|n| n.state.draw.material.0).collect();
        assert_eq!(order, vec![1, 2]);
    }
}

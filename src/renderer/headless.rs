use std::collections::HashMap;

use glam::Mat4;

use crate::renderer::device::{
    BufferId, BufferUsage, GraphicsDevice, IndexedDraw, MapMode, ObjectId, TextureHandle,
};
use crate::renderer::draw::{BlendMode, DrawDescription};
use crate::renderer::error::RenderError;
use crate::renderer::state::DrawState;
use crate::renderer::Vertex;

struct HeadlessBuffer<T> {
    data: Vec<T>,
    capacity: usize,
    usage: BufferUsage,
}

impl<T: Copy + Default> HeadlessBuffer<T> {
    fn new(capacity: usize, usage: BufferUsage) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            usage,
        }
    }

    fn write(&mut self, offset: usize, src: &[T], mode: MapMode) -> Result<(), RenderError> {
        let end = offset + src.len();
        if end > self.capacity {
            return Err(RenderError::BufferOverflow {
                requested: end,
                capacity: self.capacity,
            });
        }
        if mode == MapMode::Discard {
            self.data.clear();
        }
        if self.data.len() < end {
            self.data.resize(end, T::default());
        }
        self.data[offset..end].copy_from_slice(src);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadlessTexture {
    pub width: u32,
    pub height: u32,
    pub render_target: bool,
    /// Last silhouette rendered into (or copied into) this texture.
    pub contents: Option<(ObjectId, Mat4)>,
}

#[derive(Debug, Clone)]
pub struct RecordedDraw {
    pub state: DrawState,
    pub description: DrawDescription,
    pub draw: IndexedDraw,
    pub triangles: Vec<[Vertex; 3]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedProjection {
    pub receiver: ObjectId,
    pub texture: TextureHandle,
    pub texture_matrix: Mat4,
    pub blend: BlendMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub buffers_created: u32,
    pub discards: u32,
    pub appends: u32,
    pub state_changes: u32,
    pub silhouettes: u32,
    pub texture_copies: u32,
}

/// CPU implementation of [`GraphicsDevice`] that records what it is asked
/// to draw.
///
/// Buffer contents are kept so every draw can be resolved back into its
/// triangles; the sorting and shadow tests inspect those.
pub struct HeadlessDevice {
    next_id: u32,
    vertex_buffers: HashMap<BufferId, HeadlessBuffer<Vertex>>,
    index_buffers: HashMap<BufferId, HeadlessBuffer<u16>>,
    textures: HashMap<TextureHandle, HeadlessTexture>,
    bound: Option<(BufferId, BufferId)>,
    state: DrawState,
    draws: Vec<RecordedDraw>,
    projections: Vec<RecordedProjection>,
    stats: DeviceStats,
    lost: bool,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            vertex_buffers: HashMap::new(),
            index_buffers: HashMap::new(),
            textures: HashMap::new(),
            bound: None,
            state: DrawState::default(),
            draws: Vec::new(),
            projections: Vec::new(),
            stats: DeviceStats::default(),
            lost: false,
        }
    }

    pub fn draws(&self) -> &[RecordedDraw] {
        &self.draws
    }

    pub fn projections(&self) -> &[RecordedProjection] {
        &self.projections
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&HeadlessTexture> {
        self.textures.get(&handle)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.vertex_buffers.len() + self.index_buffers.len()
    }

    pub fn buffer_usage(&self, id: BufferId) -> Option<BufferUsage> {
        self.vertex_buffers
            .get(&id)
            .map(|b| b.usage)
            .or_else(|| self.index_buffers.get(&id).map(|b| b.usage))
    }

    pub fn vertex_capacity(&self, id: BufferId) -> Option<usize> {
        self.vertex_buffers.get(&id).map(|b| b.capacity)
    }

    /// Forget recorded draws and counters, keeping resources alive.
    pub fn clear_records(&mut self) {
        self.draws.clear();
        self.projections.clear();
        self.stats = DeviceStats::default();
    }

    /// Simulate device loss: every resource is gone and creation fails until
    /// [`restore`](Self::restore) is called.
    pub fn lose(&mut self) {
        log::warn!("Headless device lost");
        self.lost = true;
        self.vertex_buffers.clear();
        self.index_buffers.clear();
        self.textures.clear();
        self.bound = None;
    }

    pub fn restore(&mut self) {
        self.lost = false;
    }

    fn allocate_id(&mut self) -> Result<u32, RenderError> {
        if self.lost {
            return Err(RenderError::DeviceLost);
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    fn texture_mut(&mut self, handle: TextureHandle) -> Result<&mut HeadlessTexture, RenderError> {
        self.textures
            .get_mut(&handle)
            .ok_or(RenderError::UnknownTexture(handle))
    }

    fn resolve_triangles(&self, draw: IndexedDraw) -> Result<Vec<[Vertex; 3]>, RenderError> {
        let (vb, ib) = self.bound.ok_or(RenderError::NoBuffersBound)?;
        let vertices = self
            .vertex_buffers
            .get(&vb)
            .ok_or(RenderError::UnknownBuffer(vb))?;
        let indices = self
            .index_buffers
            .get(&ib)
            .ok_or(RenderError::UnknownBuffer(ib))?;

        let first = draw.first_index as usize;
        let end = first + draw.triangle_count as usize * 3;
        if end > indices.data.len() {
            return Err(RenderError::BufferOverflow {
                requested: end,
                capacity: indices.data.len(),
            });
        }

        let min = draw.min_vertex;
        let max = draw.min_vertex + draw.vertex_count;
        let mut triangles = Vec::with_capacity(draw.triangle_count as usize);
        for tri in indices.data[first..end].chunks_exact(3) {
            let mut resolved = [Vertex::default(); 3];
            for (slot, &index) in resolved.iter_mut().zip(tri) {
                let local = index as u32;
                if local < min || local >= max {
                    return Err(RenderError::IndexOutOfRange {
                        index: local,
                        min,
                        end: max,
                    });
                }
                let absolute = (local + draw.base_vertex) as usize;
                *slot = *vertices.data.get(absolute).ok_or(RenderError::IndexOutOfRange {
                    index: absolute as u32,
                    min: 0,
                    end: vertices.data.len() as u32,
                })?;
            }
            triangles.push(resolved);
        }
        Ok(triangles)
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_vertex_buffer(
        &mut self,
        capacity: usize,
        usage: BufferUsage,
    ) -> Result<BufferId, RenderError> {
        let id = BufferId(self.allocate_id()?);
        self.vertex_buffers
            .insert(id, HeadlessBuffer::new(capacity, usage));
        self.stats.buffers_created += 1;
        Ok(id)
    }

    fn create_index_buffer(
        &mut self,
        capacity: usize,
        usage: BufferUsage,
    ) -> Result<BufferId, RenderError> {
        let id = BufferId(self.allocate_id()?);
        self.index_buffers
            .insert(id, HeadlessBuffer::new(capacity, usage));
        self.stats.buffers_created += 1;
        Ok(id)
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        self.vertex_buffers.remove(&id);
        self.index_buffers.remove(&id);
        if matches!(self.bound, Some((vb, ib)) if vb == id || ib == id) {
            self.bound = None;
        }
    }

    fn write_vertices(
        &mut self,
        id: BufferId,
        offset: usize,
        data: &[Vertex],
        mode: MapMode,
    ) -> Result<(), RenderError> {
        let buffer = self
            .vertex_buffers
            .get_mut(&id)
            .ok_or(RenderError::UnknownBuffer(id))?;
        buffer.write(offset, data, mode)?;
        match mode {
            MapMode::Discard => self.stats.discards += 1,
            MapMode::NoOverwrite => self.stats.appends += 1,
        }
        Ok(())
    }

    fn write_indices(
        &mut self,
        id: BufferId,
        offset: usize,
        data: &[u16],
        mode: MapMode,
    ) -> Result<(), RenderError> {
        let buffer = self
            .index_buffers
            .get_mut(&id)
            .ok_or(RenderError::UnknownBuffer(id))?;
        buffer.write(offset, data, mode)
    }

    fn bind_buffers(&mut self, vertices: BufferId, indices: BufferId) -> Result<(), RenderError> {
        if !self.vertex_buffers.contains_key(&vertices) {
            return Err(RenderError::UnknownBuffer(vertices));
        }
        if !self.index_buffers.contains_key(&indices) {
            return Err(RenderError::UnknownBuffer(indices));
        }
        self.bound = Some((vertices, indices));
        Ok(())
    }

    fn apply_state(&mut self, state: &DrawState) {
        if self.state != *state {
            self.stats.state_changes += 1;
            self.state = *state;
        }
    }

    fn current_state(&self) -> &DrawState {
        &self.state
    }

    fn draw_indexed(&mut self, draw: IndexedDraw) -> Result<(), RenderError> {
        if self.lost {
            return Err(RenderError::DeviceLost);
        }
        let triangles = self.resolve_triangles(draw)?;
        let description = DrawDescription::new(
            self.state.format,
            self.state.texture_count(),
            self.state.shader.blend,
        );
        self.draws.push(RecordedDraw {
            state: self.state,
            description,
            draw,
            triangles,
        });
        Ok(())
    }

    fn create_render_target(&mut self, size: u32) -> Result<TextureHandle, RenderError> {
        if size == 0 {
            return Err(RenderError::InvalidExtent {
                width: size,
                height: size,
            });
        }
        let handle = TextureHandle(self.allocate_id()?);
        self.textures.insert(
            handle,
            HeadlessTexture {
                width: size,
                height: size,
                render_target: true,
                contents: None,
            },
        );
        Ok(handle)
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidExtent { width, height });
        }
        let handle = TextureHandle(self.allocate_id()?);
        self.textures.insert(
            handle,
            HeadlessTexture {
                width,
                height,
                render_target: false,
                contents: None,
            },
        );
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
    }

    fn render_silhouette(
        &mut self,
        target: TextureHandle,
        object: ObjectId,
        view_proj: Mat4,
    ) -> Result<(), RenderError> {
        let texture = self.texture_mut(target)?;
        texture.contents = Some((object, view_proj));
        self.stats.silhouettes += 1;
        Ok(())
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<(), RenderError> {
        let contents = self
            .textures
            .get(&src)
            .ok_or(RenderError::UnknownTexture(src))?
            .contents;
        self.texture_mut(dst)?.contents = contents;
        self.stats.texture_copies += 1;
        Ok(())
    }

    fn draw_projected(
        &mut self,
        receiver: ObjectId,
        texture: TextureHandle,
        texture_matrix: Mat4,
        blend: BlendMode,
    ) -> Result<(), RenderError> {
        if !self.textures.contains_key(&texture) {
            return Err(RenderError::UnknownTexture(texture));
        }
        self.projections.push(RecordedProjection {
            receiver,
            texture,
            texture_matrix,
            blend,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::vertex::v;

    fn quad() -> [Vertex; 4] {
        [
            v([0.0, 0.0, 0.0], 0, [0.0, 0.0]),
            v([1.0, 0.0, 0.0], 0, [1.0, 0.0]),
            v([1.0, 1.0, 0.0], 0, [1.0, 1.0]),
            v([0.0, 1.0, 0.0], 0, [0.0, 1.0]),
        ]
    }

    #[test]
    fn draws_resolve_through_base_vertex() {
        let mut device = HeadlessDevice::new();
        let vb = device.create_vertex_buffer(8, BufferUsage::Dynamic).unwrap();
        let ib = device.create_index_buffer(6, BufferUsage::Dynamic).unwrap();
        device.write_vertices(vb, 4, &quad(), MapMode::Discard).unwrap();
        device
            .write_indices(ib, 0, &[0, 1, 2, 0, 2, 3], MapMode::Discard)
            .unwrap();
        device.bind_buffers(vb, ib).unwrap();
        device
            .draw_indexed(IndexedDraw {
                first_index: 0,
                triangle_count: 2,
                min_vertex: 0,
                vertex_count: 4,
                base_vertex: 4,
            })
            .unwrap();

        let draw = &device.draws()[0];
        assert_eq!(draw.triangles.len(), 2);
        assert_eq!(draw.triangles[1][2].position, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn indices_outside_declared_range_are_rejected() {
        let mut device = HeadlessDevice::new();
        let vb = device.create_vertex_buffer(4, BufferUsage::Static).unwrap();
        let ib = device.create_index_buffer(3, BufferUsage::Static).unwrap();
        device.write_vertices(vb, 0, &quad(), MapMode::Discard).unwrap();
        device.write_indices(ib, 0, &[0, 1, 3], MapMode::Discard).unwrap();
        device.bind_buffers(vb, ib).unwrap();

        let err = device
            .draw_indexed(IndexedDraw {
                first_index: 0,
                triangle_count: 1,
                min_vertex: 0,
                vertex_count: 3,
                base_vertex: 0,
            })
            .unwrap_err();
        assert!(matches!(err, RenderError::IndexOutOfRange { index: 3, .. }));
    }

    #[test]
    fn writes_past_capacity_overflow() {
        let mut device = HeadlessDevice::new();
        let ib = device.create_index_buffer(4, BufferUsage::Dynamic).unwrap();
        let err = device
            .write_indices(ib, 2, &[0, 1, 2], MapMode::NoOverwrite)
            .unwrap_err();
        assert_eq!(
            err,
            RenderError::BufferOverflow {
                requested: 5,
                capacity: 4
            }
        );
    }

    #[test]
    fn lost_device_refuses_new_resources() {
        let mut device = HeadlessDevice::new();
        device.create_render_target(64).unwrap();
        device.lose();
        assert_eq!(device.live_textures(), 0);
        assert_eq!(device.create_texture(4, 4), Err(RenderError::DeviceLost));
        device.restore();
        assert!(device.create_texture(4, 4).is_ok());
    }
}

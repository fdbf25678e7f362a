use crate::renderer::device::{BufferId, BufferUsage, GraphicsDevice, MapMode};
use crate::renderer::error::RenderError;
use crate::renderer::Vertex;

/// 16-bit indices cannot address more vertices than this in one batch.
pub const MAX_VERTICES_PER_BATCH: usize = u16::MAX as usize;

/// Largest index count one scratch index buffer may hold.
pub const MAX_INDICES_PER_BATCH: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScratchKind {
    TerrainShadow,
    Decal,
    SortingTemp,
}

impl ScratchKind {
    pub const ALL: [ScratchKind; 3] = [Self::TerrainShadow, Self::Decal, Self::SortingTemp];

    fn slot(self) -> usize {
        match self {
            Self::TerrainShadow => 0,
            Self::Decal => 1,
            Self::SortingTemp => 2,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::TerrainShadow => "TerrainShadowScratch",
            Self::Decal => "DecalScratch",
            Self::SortingTemp => "SortingScratch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScratchCapacity {
    pub vertices: usize,
    pub indices: usize,
}

impl ScratchCapacity {
    pub const fn new(vertices: usize, indices: usize) -> Self {
        Self { vertices, indices }
    }

    fn clamped(self) -> Self {
        Self {
            vertices: self.vertices.min(MAX_VERTICES_PER_BATCH),
            indices: self.indices.min(MAX_INDICES_PER_BATCH),
        }
    }
}

/// Where an uploaded batch landed in its dynamic GPU buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadedBatch {
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub base_vertex: u32,
    pub first_index: u32,
    pub vertex_count: u32,
    pub triangle_count: u32,
}

struct DynamicBuffers {
    vertex: BufferId,
    index: BufferId,
    capacity: ScratchCapacity,
    vertex_cursor: usize,
    index_cursor: usize,
}

/// One bounded, reusable vertex/index array plus the dynamic GPU buffers it
/// uploads into.
pub struct ScratchBuffer {
    kind: ScratchKind,
    vertices: Vec<Vertex>,
    indices: Vec<u16>,
    capacity: ScratchCapacity,
    gpu_default: ScratchCapacity,
    gpu: Option<DynamicBuffers>,
    high_water: ScratchCapacity,
}

impl ScratchBuffer {
    fn new(kind: ScratchKind, capacity: ScratchCapacity, gpu_default: ScratchCapacity) -> Self {
        let capacity = capacity.clamped();
        Self {
            kind,
            vertices: Vec::with_capacity(capacity.vertices),
            indices: Vec::with_capacity(capacity.indices),
            capacity,
            gpu_default: gpu_default.clamped(),
            gpu: None,
            high_water: ScratchCapacity::default(),
        }
    }

    pub fn kind(&self) -> ScratchKind {
        self.kind
    }

    pub fn capacity(&self) -> ScratchCapacity {
        self.capacity
    }

    pub fn high_water(&self) -> ScratchCapacity {
        self.high_water
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// True when `vertices` more vertices and `indices` more indices can be
    /// appended without a flush.
    pub fn fits(&self, vertices: usize, indices: usize) -> bool {
        self.vertices.len() + vertices <= self.capacity.vertices
            && self.indices.len() + indices <= self.capacity.indices
    }

    /// True when a batch of this size could ever fit, even after a flush.
    pub fn could_fit(&self, vertices: usize, indices: usize) -> bool {
        vertices <= self.capacity.vertices && indices <= self.capacity.indices
    }

    /// Index value the next pushed vertex will have.
    pub fn base_vertex(&self) -> u16 {
        self.vertices.len() as u16
    }

    pub fn push_vertex(&mut self, vertex: Vertex) {
        debug_assert!(self.vertices.len() < self.capacity.vertices);
        self.vertices.push(vertex);
    }

    pub fn extend_vertices(&mut self, vertices: &[Vertex]) {
        debug_assert!(self.vertices.len() + vertices.len() <= self.capacity.vertices);
        self.vertices.extend_from_slice(vertices);
    }

    pub fn push_triangle(&mut self, a: u16, b: u16, c: u16) {
        debug_assert!(self.indices.len() + 3 <= self.capacity.indices);
        self.indices.extend_from_slice(&[a, b, c]);
    }

    pub fn extend_indices(&mut self, indices: &[u16]) {
        debug_assert!(self.indices.len() + indices.len() <= self.capacity.indices);
        self.indices.extend_from_slice(indices);
    }

    /// Grow the CPU arrays so a batch of the given size fits. Growth is
    /// bounded by [`MAX_VERTICES_PER_BATCH`] and [`MAX_INDICES_PER_BATCH`];
    /// returns false when the demand cannot be met.
    pub fn ensure_capacity(&mut self, vertices: usize, indices: usize) -> bool {
        if vertices > MAX_VERTICES_PER_BATCH || indices > MAX_INDICES_PER_BATCH {
            return false;
        }
        if vertices > self.capacity.vertices || indices > self.capacity.indices {
            let grown = ScratchCapacity {
                vertices: vertices.max(self.capacity.vertices),
                indices: indices.max(self.capacity.indices),
            };
            log::info!(
                "Growing {} scratch: {:?} -> {:?}",
                self.kind.label(),
                self.capacity,
                grown
            );
            self.vertices.reserve(grown.vertices - self.vertices.len());
            self.indices.reserve(grown.indices - self.indices.len());
            self.capacity = grown;
        }
        true
    }

    /// Drop the accumulated geometry without uploading it.
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
    }

    /// Upload the accumulated geometry and reset the CPU arrays.
    ///
    /// Writes append behind the previous batch with [`MapMode::NoOverwrite`]
    /// while they fit, and wrap to the start with [`MapMode::Discard`] when
    /// they do not. The GPU buffers are sized `max(default, demand)` and are
    /// only recreated when a batch outgrows them.
    pub fn upload(
        &mut self,
        device: &mut dyn GraphicsDevice,
    ) -> Result<Option<UploadedBatch>, RenderError> {
        if self.indices.is_empty() {
            self.vertices.clear();
            return Ok(None);
        }

        self.high_water.vertices = self.high_water.vertices.max(self.vertices.len());
        self.high_water.indices = self.high_water.indices.max(self.indices.len());

        let demand = ScratchCapacity::new(self.vertices.len(), self.indices.len());
        self.ensure_gpu_buffers(device, demand)?;
        let Some(gpu) = self.gpu.as_mut() else {
            return Err(RenderError::DeviceLost);
        };

        let (vertex_offset, vertex_mode) =
            next_write(gpu.vertex_cursor, demand.vertices, gpu.capacity.vertices);
        let (index_offset, index_mode) =
            next_write(gpu.index_cursor, demand.indices, gpu.capacity.indices);

        device.write_vertices(gpu.vertex, vertex_offset, &self.vertices, vertex_mode)?;
        device.write_indices(gpu.index, index_offset, &self.indices, index_mode)?;
        gpu.vertex_cursor = vertex_offset + demand.vertices;
        gpu.index_cursor = index_offset + demand.indices;

        let batch = UploadedBatch {
            vertex_buffer: gpu.vertex,
            index_buffer: gpu.index,
            base_vertex: vertex_offset as u32,
            first_index: index_offset as u32,
            vertex_count: demand.vertices as u32,
            triangle_count: (demand.indices / 3) as u32,
        };
        self.clear();
        Ok(Some(batch))
    }

    fn ensure_gpu_buffers(
        &mut self,
        device: &mut dyn GraphicsDevice,
        demand: ScratchCapacity,
    ) -> Result<(), RenderError> {
        let required = ScratchCapacity {
            vertices: demand.vertices.max(self.gpu_default.vertices),
            indices: demand.indices.max(self.gpu_default.indices),
        };

        if let Some(gpu) = &self.gpu {
            if gpu.capacity.vertices >= demand.vertices && gpu.capacity.indices >= demand.indices {
                return Ok(());
            }
            log::info!(
                "Growing {} GPU buffers: {:?} -> {:?}",
                self.kind.label(),
                gpu.capacity,
                required
            );
            device.destroy_buffer(gpu.vertex);
            device.destroy_buffer(gpu.index);
            self.gpu = None;
        }

        let vertex = device.create_vertex_buffer(required.vertices, BufferUsage::Dynamic)?;
        let index = match device.create_index_buffer(required.indices, BufferUsage::Dynamic) {
            Ok(index) => index,
            Err(err) => {
                device.destroy_buffer(vertex);
                return Err(err);
            }
        };
        log::info!(
            "Created {} GPU buffers ({} vertices, {} indices)",
            self.kind.label(),
            required.vertices,
            required.indices
        );
        self.gpu = Some(DynamicBuffers {
            vertex,
            index,
            capacity: required,
            vertex_cursor: 0,
            index_cursor: 0,
        });
        Ok(())
    }

    fn release(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(gpu) = self.gpu.take() {
            device.destroy_buffer(gpu.vertex);
            device.destroy_buffer(gpu.index);
        }
        self.clear();
    }

    /// Forget GPU buffers that died with the device without destroying them.
    fn invalidate(&mut self) {
        self.gpu = None;
        self.clear();
    }
}

fn next_write(cursor: usize, len: usize, capacity: usize) -> (usize, MapMode) {
    if cursor == 0 {
        (0, MapMode::Discard)
    } else if cursor + len <= capacity {
        (cursor, MapMode::NoOverwrite)
    } else {
        (0, MapMode::Discard)
    }
}

/// Bounded reusable scratch arrays keyed by what they are filled with.
pub struct ScratchBufferPool {
    slots: [ScratchBuffer; 3],
}

impl ScratchBufferPool {
    pub fn new(
        terrain_shadow: ScratchCapacity,
        decal: ScratchCapacity,
        sorting: ScratchCapacity,
    ) -> Self {
        Self {
            slots: [
                ScratchBuffer::new(ScratchKind::TerrainShadow, terrain_shadow, terrain_shadow),
                ScratchBuffer::new(ScratchKind::Decal, decal, decal),
                ScratchBuffer::new(ScratchKind::SortingTemp, sorting, sorting),
            ],
        }
    }

    pub fn from_settings(settings: &crate::settings::ShadowSettings, sorting: ScratchCapacity) -> Self {
        Self::new(
            settings.terrain_shadow_scratch(),
            settings.decal_scratch(),
            sorting,
        )
    }

    pub fn get(&self, kind: ScratchKind) -> &ScratchBuffer {
        &self.slots[kind.slot()]
    }

    pub fn get_mut(&mut self, kind: ScratchKind) -> &mut ScratchBuffer {
        &mut self.slots[kind.slot()]
    }

    pub fn high_water(&self, kind: ScratchKind) -> ScratchCapacity {
        self.get(kind).high_water()
    }

    /// Destroy every GPU buffer the pool owns (first phase of device loss).
    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for slot in &mut self.slots {
            slot.release(device);
        }
    }

    /// Drop references to GPU buffers that the device already freed.
    pub fn invalidate(&mut self) {
        for slot in &mut self.slots {
            slot.invalidate();
        }
    }
}

impl Default for ScratchBufferPool {
    fn default() -> Self {
        Self::from_settings(
            &crate::settings::ShadowSettings::default(),
            crate::settings::SortingSettings::default().scratch_capacity(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::HeadlessDevice;

    fn fill(buffer: &mut ScratchBuffer, quads: usize) {
        for _ in 0..quads {
            let base = buffer.base_vertex();
            for _ in 0..4 {
                buffer.push_vertex(Vertex::default());
            }
            buffer.push_triangle(base, base + 1, base + 2);
            buffer.push_triangle(base, base + 2, base + 3);
        }
    }

    #[test]
    fn fits_respects_both_arrays() {
        let pool = ScratchBufferPool::new(
            ScratchCapacity::new(8, 6),
            ScratchCapacity::new(8, 6),
            ScratchCapacity::new(8, 6),
        );
        let decal = pool.get(ScratchKind::Decal);
        assert!(decal.fits(8, 6));
        assert!(!decal.fits(9, 6));
        assert!(!decal.fits(4, 7));
    }

    #[test]
    fn uploads_append_then_wrap_with_discard() {
        let mut device = HeadlessDevice::new();
        let mut pool = ScratchBufferPool::new(
            ScratchCapacity::new(8, 12),
            ScratchCapacity::new(8, 12),
            ScratchCapacity::new(8, 12),
        );
        let scratch = pool.get_mut(ScratchKind::Decal);

        fill(scratch, 1);
        let first = scratch.upload(&mut device).unwrap().unwrap();
        assert_eq!(first.base_vertex, 0);

        fill(scratch, 1);
        let second = scratch.upload(&mut device).unwrap().unwrap();
        assert_eq!(second.base_vertex, 4);
        assert_eq!(second.first_index, 6);
        assert_eq!(second.vertex_buffer, first.vertex_buffer);

        fill(scratch, 1);
        let third = scratch.upload(&mut device).unwrap().unwrap();
        assert_eq!(third.base_vertex, 0);

        let stats = device.stats();
        assert_eq!(stats.discards, 2);
        assert_eq!(stats.appends, 1);
        assert_eq!(stats.buffers_created, 2);
        assert!(scratch.is_empty());
    }

    #[test]
    fn empty_upload_is_a_no_op() {
        let mut device = HeadlessDevice::new();
        let mut pool = ScratchBufferPool::default();
        let batch = pool
            .get_mut(ScratchKind::TerrainShadow)
            .upload(&mut device)
            .unwrap();
        assert!(batch.is_none());
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn sorting_scratch_grows_but_never_past_index_limit() {
        let mut pool = ScratchBufferPool::new(
            ScratchCapacity::new(8, 12),
            ScratchCapacity::new(8, 12),
            ScratchCapacity::new(16, 24),
        );
        let sorting = pool.get_mut(ScratchKind::SortingTemp);
        assert!(sorting.ensure_capacity(1000, 3000));
        assert_eq!(sorting.capacity(), ScratchCapacity::new(1000, 3000));
        assert!(!sorting.ensure_capacity(MAX_VERTICES_PER_BATCH + 1, 3));
        assert!(!sorting.ensure_capacity(3, MAX_INDICES_PER_BATCH + 1));
        assert!(sorting.ensure_capacity(3, MAX_INDICES_PER_BATCH));
    }

    #[test]
    fn oversized_construction_is_clamped_to_16_bit_limits() {
        let pool = ScratchBufferPool::new(
            ScratchCapacity::new(100_000, 200_000),
            ScratchCapacity::new(8, 12),
            ScratchCapacity::new(8, 12),
        );
        let terrain = pool.get(ScratchKind::TerrainShadow).capacity();
        assert_eq!(
            terrain,
            ScratchCapacity::new(MAX_VERTICES_PER_BATCH, MAX_INDICES_PER_BATCH)
        );
    }

    #[test]
    fn release_destroys_gpu_buffers() {
        let mut device = HeadlessDevice::new();
        let mut pool = ScratchBufferPool::default();
        fill(pool.get_mut(ScratchKind::Decal), 2);
        pool.get_mut(ScratchKind::Decal).upload(&mut device).unwrap();
        assert_eq!(device.live_buffers(), 2);
        pool.release(&mut device);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(pool.high_water(ScratchKind::Decal), ScratchCapacity::new(8, 12));
    }
}

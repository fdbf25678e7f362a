use glam::Mat4;

use crate::renderer::draw::BlendMode;
use crate::renderer::error::RenderError;
use crate::renderer::state::DrawState;
use crate::renderer::Vertex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightSetId(pub u32);

impl LightSetId {
    pub const NONE: Self = Self(0);
}

/// Identity of a scene object as the device knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Static,
    /// Rewritten every frame, mapped with [`MapMode`].
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapMode {
    /// Previous contents are dropped; the write starts a new generation.
    Discard,
    /// Append past data still referenced by in-flight draws.
    NoOverwrite,
}

/// One indexed triangle-list draw against the bound buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedDraw {
    pub first_index: u32,
    pub triangle_count: u32,
    pub min_vertex: u32,
    pub vertex_count: u32,
    /// Added to every index value fetched by this draw.
    pub base_vertex: u32,
}

/// The graphics-device abstraction the sorting and shadow systems drive.
///
/// Implementations own every GPU object; the core only holds ids.
pub trait GraphicsDevice {
    fn create_vertex_buffer(
        &mut self,
        capacity: usize,
        usage: BufferUsage,
    ) -> Result<BufferId, RenderError>;

    fn create_index_buffer(
        &mut self,
        capacity: usize,
        usage: BufferUsage,
    ) -> Result<BufferId, RenderError>;

    fn destroy_buffer(&mut self, id: BufferId);

    fn write_vertices(
        &mut self,
        id: BufferId,
        offset: usize,
        data: &[Vertex],
        mode: MapMode,
    ) -> Result<(), RenderError>;

    fn write_indices(
        &mut self,
        id: BufferId,
        offset: usize,
        data: &[u16],
        mode: MapMode,
    ) -> Result<(), RenderError>;

    fn bind_buffers(&mut self, vertices: BufferId, indices: BufferId) -> Result<(), RenderError>;

    fn apply_state(&mut self, state: &DrawState);

    fn current_state(&self) -> &DrawState;

    fn draw_indexed(&mut self, draw: IndexedDraw) -> Result<(), RenderError>;

    /// Square colour target the dynamic shadow silhouettes are rendered into.
    fn create_render_target(&mut self, size: u32) -> Result<TextureHandle, RenderError>;

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, RenderError>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Render `object` as a flat silhouette into `target` through `view_proj`.
    fn render_silhouette(
        &mut self,
        target: TextureHandle,
        object: ObjectId,
        view_proj: Mat4,
    ) -> Result<(), RenderError>;

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> Result<(), RenderError>;

    /// Draw `receiver` again with `texture` projected through `texture_matrix`.
    fn draw_projected(
        &mut self,
        receiver: ObjectId,
        texture: TextureHandle,
        texture_matrix: Mat4,
        blend: BlendMode,
    ) -> Result<(), RenderError>;
}

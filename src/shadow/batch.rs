use glam::Mat4;

use crate::renderer::draw::VertexFormat;
use crate::renderer::state::{DrawState, ShaderState, MAX_TEXTURE_STAGES};
use crate::renderer::{
    GraphicsDevice, IndexedDraw, RenderError, ScratchBufferPool, ScratchKind, TextureHandle,
};
use crate::shadow::registry::ShadowKind;
use crate::shadow::ShadowStats;

/// Geometry can only share a draw when both of these match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchKey {
    pub texture: TextureHandle,
    pub kind: ShadowKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reserve {
    Ready,
    /// Larger than the scratch buffer even when empty.
    TooLarge,
}

/// Accumulates shadow geometry in one scratch slot and draws it whenever
/// the key changes or the slot runs out of room.
pub(crate) struct ShadowBatcher {
    slot: ScratchKind,
    key: Option<BatchKey>,
}

impl ShadowBatcher {
    pub(crate) fn new(slot: ScratchKind) -> Self {
        Self { slot, key: None }
    }

    /// Make room for `vertices` and `indices` under `key`, flushing what is
    /// pending first if it has another key or would overflow.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn reserve(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scratch: &mut ScratchBufferPool,
        key: BatchKey,
        vertices: usize,
        indices: usize,
        view: Mat4,
        stats: &mut ShadowStats,
    ) -> Result<Reserve, RenderError> {
        let buffer = scratch.get(self.slot);
        if !buffer.could_fit(vertices, indices) {
            return Ok(Reserve::TooLarge);
        }
        if self.key != Some(key) || !buffer.fits(vertices, indices) {
            self.flush(device, scratch, view, stats)?;
        }
        self.key = Some(key);
        Ok(Reserve::Ready)
    }

    /// Draw whatever is pending.
    pub(crate) fn flush(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scratch: &mut ScratchBufferPool,
        view: Mat4,
        stats: &mut ShadowStats,
    ) -> Result<(), RenderError> {
        let Some(key) = self.key.take() else {
            return Ok(());
        };
        let Some(batch) = scratch.get_mut(self.slot).upload(device)? else {
            return Ok(());
        };

        let mut textures = [None; MAX_TEXTURE_STAGES];
        textures[0] = Some(key.texture);
        device.apply_state(&DrawState {
            shader: ShaderState::translucent(key.kind.blend()),
            format: VertexFormat::DIFFUSE,
            textures,
            world: Mat4::IDENTITY,
            view,
            ..DrawState::default()
        });
        device.bind_buffers(batch.vertex_buffer, batch.index_buffer)?;
        device.draw_indexed(IndexedDraw {
            first_index: batch.first_index,
            triangle_count: batch.triangle_count,
            min_vertex: 0,
            vertex_count: batch.vertex_count,
            base_vertex: batch.base_vertex,
        })?;

        match self.slot {
            ScratchKind::TerrainShadow => stats.terrain_batches += 1,
            _ => stats.decal_batches += 1,
        }
        stats.flushed_vertices += batch.vertex_count;
        Ok(())
    }

    /// Forget pending geometry without drawing it.
    pub(crate) fn discard(&mut self, scratch: &mut ScratchBufferPool) {
        self.key = None;
        scratch.get_mut(self.slot).clear();
    }
}

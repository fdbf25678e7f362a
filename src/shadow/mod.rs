//! Projected shadows and ground decals.
//!
//! Casters register shadows in a [`ShadowRegistry`]; the
//! [`ShadowManager`] keeps their textures current with the light and draws
//! them on the terrain and on nearby receivers once per frame.

pub(crate) mod batch;
pub mod decal;
pub mod grid;
pub mod manager;
pub mod projection;
pub mod registry;
pub mod texture;

pub use decal::{decal_basis, DecalFrame, DecalTessellator, QueueStatus, SimpleDecal};
pub use grid::CellRect;
pub use manager::ShadowManager;
pub use projection::{project_uv, projector_for, DrawStatus, ShadowProjectionEngine, UpdateStats};
pub use registry::{
    ProjectedShadow, Projector, ShadowHandle, ShadowKind, ShadowList, ShadowRegistry, ShadowSource,
    ShadowState, ShadowTypeInfo,
};
pub use texture::{ShadowTexture, ShadowTextureCache, ShadowTextureHandle, TextureSource};

/// Per-frame counters from one shadow render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShadowStats {
    pub terrain_batches: u32,
    pub decal_batches: u32,
    pub flushed_vertices: u32,
    /// Shadows with nothing on screen or too large to draw.
    pub culled: u32,
    pub receiver_draws: u32,
    pub textures_updated: u32,
}

use std::rc::Rc;

use glam::{Mat4, Vec3};

use crate::asset::TextureProvider;
use crate::renderer::{
    FlushStats, GraphicsDevice, RenderError, ScratchBufferPool, ScratchKind, SortingPool,
};
use crate::scene::{HeightField, PartitionQuery, ShadowCaster};
use crate::settings::{RenderSettings, ShadowSettings};
use crate::shadow::decal::{DecalTessellator, QueueStatus, SimpleDecal};
use crate::shadow::projection::{ShadowProjectionEngine, UpdateStats};
use crate::shadow::registry::{ShadowHandle, ShadowRegistry, ShadowTypeInfo};
use crate::shadow::ShadowStats;

/// Shadow and decal state of one renderer.
///
/// Owns the registry with its texture cache, the scratch buffers shared with
/// the sorting pool, and both shadow passes. Device loss is handled in two
/// steps: [`release_resources`](Self::release_resources) before the device
/// goes away and [`reacquire_resources`](Self::reacquire_resources) once a
/// new one exists. Nothing renders in between.
pub struct ShadowManager {
    settings: ShadowSettings,
    registry: ShadowRegistry,
    scratch: ScratchBufferPool,
    projection: ShadowProjectionEngine,
    decals: DecalTessellator,
    shadows_enabled: bool,
    released: bool,
    /// Counters from work done outside `render` (texture updates, batches
    /// flushed while queueing simple decals), reported by the next render.
    pending_stats: ShadowStats,
}

impl ShadowManager {
    pub fn new(settings: &RenderSettings) -> Self {
        let settings = settings.clone().validate();
        let shadows = settings.shadows;
        let scratch = ScratchBufferPool::from_settings(&shadows, settings.sorting.scratch_capacity());
        Self {
            registry: ShadowRegistry::new(shadows.shadow_texture_size),
            projection: ShadowProjectionEngine::new(shadows.shadow_texture_size),
            decals: DecalTessellator::new(shadows.max_decal_cells),
            scratch,
            settings: shadows,
            shadows_enabled: true,
            released: false,
            pending_stats: ShadowStats::default(),
        }
    }

    pub fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ShadowRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ShadowRegistry {
        &mut self.registry
    }

    pub fn scratch(&self) -> &ScratchBufferPool {
        &self.scratch
    }

    pub fn scratch_mut(&mut self) -> &mut ScratchBufferPool {
        &mut self.scratch
    }

    pub fn projection(&self) -> &ShadowProjectionEngine {
        &self.projection
    }

    pub fn shadows_enabled(&self) -> bool {
        self.shadows_enabled
    }

    pub fn set_shadows_enabled(&mut self, enabled: bool) {
        if self.shadows_enabled != enabled {
            log::info!("Shadows {}", if enabled { "enabled" } else { "disabled" });
        }
        self.shadows_enabled = enabled;
    }

    /// True between a release and the matching reacquire.
    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn add_shadow(
        &mut self,
        device: &mut dyn GraphicsDevice,
        provider: &mut dyn TextureProvider,
        caster: &Rc<dyn ShadowCaster>,
        info: &ShadowTypeInfo,
    ) -> Option<ShadowHandle> {
        self.registry.add_shadow(device, provider, caster, info)
    }

    pub fn add_decal(
        &mut self,
        provider: &mut dyn TextureProvider,
        info: &ShadowTypeInfo,
    ) -> Option<ShadowHandle> {
        self.registry.add_decal(provider, info)
    }

    pub fn remove_shadow(&mut self, device: &mut dyn GraphicsDevice, handle: ShadowHandle) -> bool {
        self.registry.remove_shadow(device, handle)
    }

    pub fn remove_caster(
        &mut self,
        device: &mut dyn GraphicsDevice,
        caster: &Rc<dyn ShadowCaster>,
    ) -> usize {
        self.registry.remove_caster(device, caster)
    }

    pub fn remove_all_shadows(&mut self, device: &mut dyn GraphicsDevice) {
        self.discard_pending();
        self.registry.remove_all_shadows(device);
    }

    /// Tear down every shadow and cached texture.
    pub fn reset(&mut self, device: &mut dyn GraphicsDevice) {
        self.discard_pending();
        self.registry.reset(device);
        self.pending_stats.textures_updated = 0;
    }

    /// Bring every shadow up to date with the light at `light_position`.
    pub fn update(
        &mut self,
        device: &mut dyn GraphicsDevice,
        light_position: Vec3,
    ) -> Result<UpdateStats, RenderError> {
        if self.released || !self.shadows_enabled {
            return Ok(UpdateStats::default());
        }
        let stats = self.projection.update(device, &mut self.registry, light_position)?;
        self.pending_stats.textures_updated += stats.textures_updated;
        if stats.textures_updated > 0 {
            log::debug!("{} shadow textures regenerated", stats.textures_updated);
        }
        Ok(stats)
    }

    /// Draw terrain shadows, decals and receiver projections for one frame.
    ///
    /// The device's draw state is restored afterwards.
    pub fn render(
        &mut self,
        device: &mut dyn GraphicsDevice,
        terrain: &dyn HeightField,
        partition: &dyn PartitionQuery,
        view: Mat4,
    ) -> Result<ShadowStats, RenderError> {
        let mut stats = std::mem::take(&mut self.pending_stats);
        if self.released || !self.shadows_enabled {
            self.discard_pending();
            return Ok(stats);
        }

        let saved = *device.current_state();
        let result = self.render_passes(device, terrain, partition, view, &mut stats);
        device.apply_state(&saved);

        if let Err(err) = &result {
            log::error!("Shadow pass failed: {}", err);
            self.discard_pending();
        }
        result.map(|()| stats)
    }

    fn render_passes(
        &mut self,
        device: &mut dyn GraphicsDevice,
        terrain: &dyn HeightField,
        partition: &dyn PartitionQuery,
        view: Mat4,
        stats: &mut ShadowStats,
    ) -> Result<(), RenderError> {
        self.projection
            .render_terrain(device, &mut self.scratch, &self.registry, terrain, view, stats)?;
        self.decals
            .render_decals(device, &mut self.scratch, &self.registry, terrain, view, stats)?;
        self.projection
            .render_receivers(device, &self.registry, partition, stats)
    }

    /// Queue a four-vertex decal; it is drawn with the next decal batch.
    pub fn queue_simple_decal(
        &mut self,
        device: &mut dyn GraphicsDevice,
        decal: &SimpleDecal,
        terrain: &dyn HeightField,
        view: Mat4,
    ) -> Result<QueueStatus, RenderError> {
        if self.released || !self.shadows_enabled {
            return Ok(QueueStatus::Skipped);
        }
        self.decals.queue_simple_decal(
            device,
            &mut self.scratch,
            decal,
            terrain,
            view,
            &mut self.pending_stats,
        )
    }

    /// Flush `pool` through the sorting scratch buffer owned here.
    pub fn flush_sorting(
        &mut self,
        device: &mut dyn GraphicsDevice,
        pool: &mut SortingPool,
    ) -> Result<FlushStats, RenderError> {
        if self.released {
            pool.clear();
            return Ok(FlushStats::default());
        }
        pool.flush(device, &mut self.scratch)
    }

    /// First half of device loss: free every device resource and forget the
    /// light history so all shadows regenerate afterwards.
    pub fn release_resources(&mut self, device: &mut dyn GraphicsDevice) {
        self.discard_pending();
        self.registry.textures_mut().release_device_resources(device);
        self.scratch.release(device);
        self.projection.release(device);
        self.registry.invalidate_light_history();
        self.released = true;
        log::info!("Released shadow device resources");
    }

    /// Second half of device loss. Returns how many shadow textures could
    /// not be restored; their shadows stay hidden.
    pub fn reacquire_resources(
        &mut self,
        device: &mut dyn GraphicsDevice,
        provider: &mut dyn TextureProvider,
    ) -> Result<usize, RenderError> {
        let failed = self
            .registry
            .textures_mut()
            .reacquire_device_resources(device, provider)?;
        self.released = false;
        log::info!("Reacquired shadow device resources ({} failed)", failed);
        Ok(failed)
    }

    fn discard_pending(&mut self) {
        self.projection.discard(&mut self.scratch);
        self.decals.discard(&mut self.scratch);
        self.scratch.get_mut(ScratchKind::SortingTemp).clear();
    }
}

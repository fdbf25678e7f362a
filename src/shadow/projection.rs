use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use crate::renderer::{
    GraphicsDevice, ObjectId, RenderError, ScratchBufferPool, ScratchKind, TextureHandle, Vertex,
};
use crate::scene::{HeightField, PartitionQuery, ShadowCaster, Sphere};
use crate::shadow::batch::{BatchKey, Reserve, ShadowBatcher};
use crate::shadow::grid::{tessellate, CellRect};
use crate::shadow::registry::{
    ProjectedShadow, Projector, ShadowHandle, ShadowKind, ShadowList, ShadowRegistry, ShadowState,
};
use crate::shadow::texture::ShadowTexture;
use crate::shadow::ShadowStats;

/// Smallest radius a projector frames, so point-like casters still get a
/// valid frustum.
const MIN_PROJECTOR_RADIUS: f32 = 0.01;

/// Maps clip space to texture coordinates with v pointing down.
const CLIP_TO_TEXTURE: Mat4 = Mat4::from_cols(
    Vec4::new(0.5, 0.0, 0.0, 0.0),
    Vec4::new(0.0, -0.5, 0.0, 0.0),
    Vec4::new(0.0, 0.0, 1.0, 0.0),
    Vec4::new(0.5, 0.5, 0.0, 1.0),
);

/// Build the light frustum around a caster's local bounds.
///
/// `view` and `projection` take caster-space points; `texture_matrix` takes
/// world-space points, so one silhouette texture serves every instance seen
/// from the same local light direction.
pub fn projector_for(light_position: Vec3, transform: Mat4, local_bounds: Sphere) -> Projector {
    let to_local = transform.inverse();
    let light = to_local.transform_point3(light_position);
    let center = local_bounds.center;
    let radius = local_bounds.radius.max(MIN_PROJECTOR_RADIUS);

    let to_object = center - light;
    let dir = to_object.normalize_or(Vec3::NEG_Z);
    let distance = to_object.length().max(radius * 2.0);
    let eye = center - dir * distance;
    let up = if dir.z.abs() > 0.95 { Vec3::Y } else { Vec3::Z };

    let view = Mat4::look_at_rh(eye, center, up);
    let fov = 2.0 * (radius / distance).asin();
    let projection = Mat4::perspective_rh(fov, 1.0, distance - radius, distance + radius);

    Projector {
        view,
        projection,
        texture_matrix: CLIP_TO_TEXTURE * projection * view * to_local,
    }
}

/// Texture coordinates of a world point, `None` behind the projector.
pub fn project_uv(texture_matrix: &Mat4, world: Vec3) -> Option<Vec2> {
    let clip = *texture_matrix * world.extend(1.0);
    (clip.w > 0.0).then(|| Vec2::new(clip.x, clip.y) / clip.w)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawStatus {
    Queued,
    /// Nothing to draw: clipped away, disabled or the caster is gone.
    NoDraw,
    /// Larger than the scratch buffer can ever hold.
    TooLarge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Silhouettes re-rendered.
    pub textures_updated: u32,
    pub projectors_updated: u32,
    pub decal_axes_updated: u32,
    pub skipped: u32,
}

/// Keeps projection shadow textures in step with the light and draws them
/// onto the terrain and nearby receivers.
pub struct ShadowProjectionEngine {
    texture_size: u32,
    render_target: Option<TextureHandle>,
    batcher: ShadowBatcher,
}

impl ShadowProjectionEngine {
    pub fn new(texture_size: u32) -> Self {
        Self {
            texture_size,
            render_target: None,
            batcher: ShadowBatcher::new(ScratchKind::TerrainShadow),
        }
    }

    pub fn render_target(&self) -> Option<TextureHandle> {
        self.render_target
    }

    /// Bring every casting shadow up to date with `light_position`.
    pub fn update(
        &mut self,
        device: &mut dyn GraphicsDevice,
        registry: &mut ShadowRegistry,
        light_position: Vec3,
    ) -> Result<UpdateStats, RenderError> {
        let mut stats = UpdateStats::default();
        let mut cursor = registry.head(ShadowList::Casting);
        let (shadows, textures) = registry.parts_mut();

        while let Some(handle) = cursor {
            let Some(shadow) = shadows.get_mut(handle) else {
                break;
            };
            cursor = shadow.next();

            if !shadow.is_enabled() {
                stats.skipped += 1;
                continue;
            }
            let Some(caster) = shadow.caster() else {
                if shadow.kind().is_decal() && !shadow.has_caster() {
                    shadow.set_state(ShadowState::Current);
                } else {
                    stats.skipped += 1;
                }
                continue;
            };
            let Some(texture) = textures.get_mut(shadow.texture()) else {
                stats.skipped += 1;
                continue;
            };
            let transform = caster.transform();
            let orientation = Mat3::from_mat4(transform);
            let texture_stale = !texture.is_current(light_position, orientation);

            match shadow.kind() {
                ShadowKind::Projection => {
                    let moved = shadow.last_caster_transform != Some(transform);
                    if !texture_stale && !moved && shadow.state() == ShadowState::Current {
                        continue;
                    }
                    if shadow.state() == ShadowState::Current {
                        shadow.set_state(ShadowState::Stale);
                    }
                    if texture_stale {
                        if self.update_texture(device, texture, caster.as_ref(), light_position)? {
                            stats.textures_updated += 1;
                        } else {
                            stats.skipped += 1;
                            continue;
                        }
                    }
                    let local_bounds = caster.bounding_box().bounding_sphere();
                    if let Some(projector) = shadow.projector_mut() {
                        *projector = projector_for(light_position, transform, local_bounds);
                        stats.projectors_updated += 1;
                    }
                    shadow.last_caster_transform = Some(transform);
                }
                _ => {
                    if texture_stale {
                        texture.update_decal_axes(light_position, transform);
                        stats.decal_axes_updated += 1;
                    }
                    shadow.last_caster_transform = Some(transform);
                }
            }
            shadow.set_state(ShadowState::Current);
        }

        let mut cursor = registry.head(ShadowList::Standalone);
        while let Some(handle) = cursor {
            let Some(shadow) = registry.get_mut(handle) else {
                break;
            };
            cursor = shadow.next();
            shadow.set_state(ShadowState::Current);
        }
        Ok(stats)
    }

    /// Render the caster's silhouette into the shared render target and copy
    /// it into the shadow's own texture. Returns false when the texture has
    /// no device resource.
    pub fn update_texture(
        &mut self,
        device: &mut dyn GraphicsDevice,
        texture: &mut ShadowTexture,
        caster: &dyn ShadowCaster,
        light_position: Vec3,
    ) -> Result<bool, RenderError> {
        let Some(destination) = texture.texture() else {
            return Ok(false);
        };
        let target = match self.render_target {
            Some(target) => target,
            None => {
                let target = device.create_render_target(self.texture_size)?;
                log::info!(
                    "Created {}x{} shadow render target",
                    self.texture_size,
                    self.texture_size
                );
                self.render_target = Some(target);
                target
            }
        };

        let transform = caster.transform();
        let local_box = caster.bounding_box();
        let projector = projector_for(light_position, transform, local_box.bounding_sphere());
        device.render_silhouette(
            target,
            caster.object_id(),
            projector.projection * projector.view,
        )?;
        device.copy_texture(target, destination)?;

        texture.update_bounds(light_position, transform, local_box);
        texture.record_render(light_position, Mat3::from_mat4(transform));
        log::debug!("Regenerated shadow texture '{}'", texture.name());
        Ok(true)
    }

    /// Queue one projection shadow's terrain mesh.
    #[allow(clippy::too_many_arguments)]
    pub fn queue_terrain_shadow(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scratch: &mut ScratchBufferPool,
        registry: &ShadowRegistry,
        handle: ShadowHandle,
        terrain: &dyn HeightField,
        view: Mat4,
        stats: &mut ShadowStats,
    ) -> Result<DrawStatus, RenderError> {
        let Some(target) = drawable_projection(registry, handle) else {
            return Ok(DrawStatus::NoDraw);
        };
        let (_, area) = target.texture.world_bounds(target.origin);
        let Some(rect) = CellRect::from_world(terrain, area.min.truncate(), area.max.truncate())
        else {
            return Ok(DrawStatus::NoDraw);
        };

        let key = BatchKey {
            texture: target.handle,
            kind: ShadowKind::Projection,
        };
        let reserve = self.batcher.reserve(
            device,
            scratch,
            key,
            rect.vertex_count(),
            rect.index_count(),
            view,
            stats,
        )?;
        if reserve == Reserve::TooLarge {
            log::warn!(
                "Terrain shadow of {}x{} cells exceeds the scratch buffer",
                rect.cells_x(),
                rect.cells_y()
            );
            return Ok(DrawStatus::TooLarge);
        }

        let texture_matrix = target.projector.texture_matrix;
        let diffuse = target.shadow.diffuse();
        tessellate(
            scratch.get_mut(ScratchKind::TerrainShadow),
            terrain,
            rect,
            |position| Vertex {
                position: position.to_array(),
                normal: [0.0, 0.0, 1.0],
                diffuse,
                uv0: project_uv(&texture_matrix, position)
                    .unwrap_or(Vec2::splat(-1.0))
                    .to_array(),
                uv1: [0.0; 2],
            },
        );
        Ok(DrawStatus::Queued)
    }

    /// Terrain pass over every projection shadow, drawn in texture batches.
    pub fn render_terrain(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scratch: &mut ScratchBufferPool,
        registry: &ShadowRegistry,
        terrain: &dyn HeightField,
        view: Mat4,
        stats: &mut ShadowStats,
    ) -> Result<(), RenderError> {
        for handle in registry.iter(ShadowList::Casting) {
            let is_projection = registry
                .get(handle)
                .is_some_and(|s| s.kind() == ShadowKind::Projection);
            if !is_projection {
                continue;
            }
            match self.queue_terrain_shadow(device, scratch, registry, handle, terrain, view, stats)? {
                DrawStatus::Queued => {}
                DrawStatus::NoDraw | DrawStatus::TooLarge => stats.culled += 1,
            }
        }
        self.batcher.flush(device, scratch, view, stats)
    }

    /// Project shadows onto scene objects inside each shadow's area.
    pub fn render_receivers(
        &mut self,
        device: &mut dyn GraphicsDevice,
        registry: &ShadowRegistry,
        partition: &dyn PartitionQuery,
        stats: &mut ShadowStats,
    ) -> Result<(), RenderError> {
        for handle in registry.iter(ShadowList::Casting) {
            let Some(target) = drawable_projection(registry, handle) else {
                continue;
            };
            let (sphere, area) = target.texture.world_bounds(target.origin);
            let blend = ShadowKind::Projection.blend();
            let mut failure = None;

            partition.for_each_in_sphere(&sphere, &mut |receiver| {
                if failure.is_some()
                    || receiver.object_id() == target.caster_id
                    || !receiver.receives_shadows()
                    || !receiver.world_bounds().intersects(&area)
                {
                    return;
                }
                match device.draw_projected(
                    receiver.object_id(),
                    target.handle,
                    target.projector.texture_matrix,
                    blend,
                ) {
                    Ok(()) => stats.receiver_draws += 1,
                    Err(err) => failure = Some(err),
                }
            });

            if let Some(err) = failure {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Drop pending terrain geometry, e.g. before device loss.
    pub fn discard(&mut self, scratch: &mut ScratchBufferPool) {
        self.batcher.discard(scratch);
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(target) = self.render_target.take() {
            device.destroy_texture(target);
        }
    }
}

struct ProjectionTarget<'a> {
    shadow: &'a ProjectedShadow,
    texture: &'a ShadowTexture,
    projector: Projector,
    handle: TextureHandle,
    origin: Vec3,
    caster_id: ObjectId,
}

/// A projection shadow that is enabled, current and has a live, visible
/// caster and a device texture.
fn drawable_projection(registry: &ShadowRegistry, handle: ShadowHandle) -> Option<ProjectionTarget<'_>> {
    let shadow = registry.get(handle)?;
    if !shadow.is_enabled() || shadow.state() != ShadowState::Current {
        return None;
    }
    let projector = *shadow.projector()?;
    let caster = shadow.caster()?;
    if caster.is_hidden() && !shadow.invisible_enabled() {
        return None;
    }
    let texture = registry.textures().get(shadow.texture())?;
    Some(ProjectionTarget {
        shadow,
        texture,
        projector,
        handle: texture.texture()?,
        origin: caster.transform().w_axis.truncate(),
        caster_id: caster.object_id(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Aabb;

    #[test]
    fn projector_centres_the_caster_in_the_texture() {
        let transform = Mat4::from_translation(Vec3::new(50.0, 20.0, 0.0));
        let bounds = Sphere::new(Vec3::new(0.0, 0.0, 2.0), 2.0);
        let projector = projector_for(Vec3::new(50.0, 20.0, 500.0), transform, bounds);

        let uv = project_uv(&projector.texture_matrix, Vec3::new(50.0, 20.0, 2.0)).unwrap();
        assert!(uv.abs_diff_eq(Vec2::splat(0.5), 1e-4));

        let edge = transform.transform_point3(bounds.center + Vec3::new(1.0, 0.0, 0.0));
        let uv_edge = project_uv(&projector.texture_matrix, edge).unwrap();
        assert!(uv_edge.x > 0.0 && uv_edge.x < 1.0);
    }

    #[test]
    fn points_behind_the_projector_have_no_uv() {
        let bounds = Aabb::from_center_extent(Vec3::ZERO, Vec3::ONE).bounding_sphere();
        let projector = projector_for(Vec3::new(0.0, 0.0, 10.0), Mat4::IDENTITY, bounds);
        assert!(project_uv(&projector.texture_matrix, Vec3::new(0.0, 0.0, 30.0)).is_none());
    }

    #[test]
    fn identical_local_light_gives_identical_view() {
        let bounds = Sphere::new(Vec3::ZERO, 1.0);
        let a = projector_for(Vec3::new(0.0, 5.0, 50.0), Mat4::IDENTITY, bounds);
        let moved = Mat4::from_translation(Vec3::new(30.0, 0.0, 0.0));
        let b = projector_for(Vec3::new(30.0, 5.0, 50.0), moved, bounds);
        assert!(a.view.abs_diff_eq(b.view, 1e-4));
        assert_ne!(a.texture_matrix, b.texture_matrix);
    }
}

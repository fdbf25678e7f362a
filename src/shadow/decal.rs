use glam::{Mat4, Vec2, Vec3};

use crate::renderer::{
    GraphicsDevice, RenderError, ScratchBufferPool, ScratchKind, TextureHandle, Vertex,
};
use crate::scene::{Aabb, HeightField, ShadowCaster};
use crate::shadow::batch::{BatchKey, Reserve, ShadowBatcher};
use crate::shadow::grid::{tessellate, CellRect};
use crate::shadow::registry::{
    ProjectedShadow, ShadowHandle, ShadowKind, ShadowList, ShadowRegistry, ShadowState,
};
use crate::shadow::texture::ShadowTexture;
use crate::shadow::ShadowStats;

const DEGENERATE_AXIS: f32 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Queued,
    /// Disabled, not yet current, or its caster or texture is gone.
    Skipped,
    /// No terrain under the decal.
    Culled,
    TooLarge,
}

/// Horizontal U axis of a caster's decal, taken from its transform.
///
/// An object pointing straight up or down has no usable X axis; its Y axis
/// rotated a quarter turn is used instead, then plain +X.
pub fn decal_basis(transform: Mat4) -> Vec2 {
    let x = transform.x_axis.truncate().truncate();
    if x.length_squared() > DEGENERATE_AXIS {
        return x.normalize();
    }
    let y = transform.y_axis.truncate().truncate();
    if y.length_squared() > DEGENERATE_AXIS {
        return Vec2::new(y.y, -y.x).normalize();
    }
    Vec2::X
}

/// A decal's footprint in the XY plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecalFrame {
    pub center: Vec2,
    pub u: Vec2,
    pub v: Vec2,
    pub size: Vec2,
}

impl DecalFrame {
    /// Frame of `shadow`, following `caster` when it has one.
    ///
    /// An offset that would slide the decal off any corner of the caster's
    /// footprint is dropped on that axis.
    pub fn resolve(
        shadow: &ProjectedShadow,
        caster: Option<&dyn ShadowCaster>,
        texture: &ShadowTexture,
    ) -> Option<Self> {
        let size = shadow.decal_size();
        if size.x <= 0.0 || size.y <= 0.0 {
            return None;
        }

        let Some(caster) = caster else {
            let (sin, cos) = shadow.angle().sin_cos();
            let u = Vec2::new(cos, sin);
            let frame = Self {
                center: shadow.position().truncate(),
                u,
                v: u.perp(),
                size,
            };
            return Some(frame.offset_by(shadow.offset()));
        };

        let transform = caster.transform();
        let mut u = decal_basis(transform);
        if shadow.kind() == ShadowKind::Decal {
            let light = texture.local_light_dir();
            u = (u * light.x + u.perp() * light.y).normalize_or(u);
        }
        let base = Self {
            center: transform.w_axis.truncate().truncate(),
            u,
            v: u.perp(),
            size,
        };

        let mut offset = shadow.offset();
        let shifted = base.offset_by(offset);
        let (mut clear_u, mut clear_v) = (false, false);
        for corner in footprint(transform, caster.bounding_box()) {
            let uv = shifted.uv(corner);
            clear_u |= !(0.0..=1.0).contains(&uv.x);
            clear_v |= !(0.0..=1.0).contains(&uv.y);
        }
        if clear_u {
            offset.x = 0.0;
        }
        if clear_v {
            offset.y = 0.0;
        }
        Some(base.offset_by(offset))
    }

    fn offset_by(self, offset: Vec2) -> Self {
        Self {
            center: self.center + self.u * offset.x + self.v * offset.y,
            ..self
        }
    }

    pub fn uv(&self, point: Vec2) -> Vec2 {
        let d = point - self.center;
        Vec2::new(
            0.5 + d.dot(self.u) / self.size.x,
            0.5 - d.dot(self.v) / self.size.y,
        )
    }

    pub fn corners(&self) -> [Vec2; 4] {
        let hu = self.u * (self.size.x * 0.5);
        let hv = self.v * (self.size.y * 0.5);
        [
            self.center - hu - hv,
            self.center + hu - hv,
            self.center + hu + hv,
            self.center - hu + hv,
        ]
    }

    pub fn bounds(&self) -> (Vec2, Vec2) {
        let corners = self.corners();
        let min = corners.iter().fold(Vec2::splat(f32::INFINITY), |m, c| m.min(*c));
        let max = corners.iter().fold(Vec2::splat(f32::NEG_INFINITY), |m, c| m.max(*c));
        (min, max)
    }
}

fn footprint(transform: Mat4, local: Aabb) -> [Vec2; 4] {
    let z = local.center().z;
    [
        Vec3::new(local.min.x, local.min.y, z),
        Vec3::new(local.max.x, local.min.y, z),
        Vec3::new(local.max.x, local.max.y, z),
        Vec3::new(local.min.x, local.max.y, z),
    ]
    .map(|c| transform.transform_point3(c).truncate())
}

/// A quad laid flat on the terrain at one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleDecal {
    pub texture: TextureHandle,
    pub kind: ShadowKind,
    pub center: Vec2,
    pub direction: Vec2,
    pub size: Vec2,
    pub diffuse: u32,
}

/// Builds decal meshes on the terrain and batches them by texture and kind.
pub struct DecalTessellator {
    max_cells: i32,
    batcher: ShadowBatcher,
}

impl DecalTessellator {
    pub fn new(max_cells: u32) -> Self {
        Self {
            max_cells: max_cells.min(i32::MAX as u32) as i32,
            batcher: ShadowBatcher::new(ScratchKind::Decal),
        }
    }

    pub fn max_cells(&self) -> u32 {
        self.max_cells as u32
    }

    #[allow(clippy::too_many_arguments)]
    pub fn queue_decal(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scratch: &mut ScratchBufferPool,
        registry: &ShadowRegistry,
        handle: ShadowHandle,
        terrain: &dyn HeightField,
        view: Mat4,
        stats: &mut ShadowStats,
    ) -> Result<QueueStatus, RenderError> {
        let Some(shadow) = registry.get(handle) else {
            return Ok(QueueStatus::Skipped);
        };
        if !shadow.kind().is_decal() || !shadow.is_enabled() || shadow.state() != ShadowState::Current {
            return Ok(QueueStatus::Skipped);
        }
        let Some(texture) = registry.textures().get(shadow.texture()) else {
            return Ok(QueueStatus::Skipped);
        };
        let Some(image) = texture.texture() else {
            return Ok(QueueStatus::Skipped);
        };

        let caster = shadow.caster();
        if shadow.has_caster() {
            match &caster {
                None => return Ok(QueueStatus::Skipped),
                Some(c) if c.is_hidden() && !shadow.invisible_enabled() => {
                    return Ok(QueueStatus::Skipped);
                }
                Some(_) => {}
            }
        }
        let Some(frame) = DecalFrame::resolve(shadow, caster.as_deref(), texture) else {
            return Ok(QueueStatus::Skipped);
        };

        let (min, max) = frame.bounds();
        let Some(rect) = CellRect::from_world(terrain, min, max) else {
            return Ok(QueueStatus::Culled);
        };
        let rect = rect.trimmed(self.max_cells);

        let key = BatchKey {
            texture: image,
            kind: shadow.kind(),
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
                "Decal of {}x{} cells exceeds the decal scratch buffer",
                rect.cells_x(),
                rect.cells_y()
            );
            return Ok(QueueStatus::TooLarge);
        }

        let diffuse = shadow.diffuse();
        let layer = shadow.layer_height();
        tessellate(scratch.get_mut(ScratchKind::Decal), terrain, rect, |p| {
            let z = layer.map_or(p.z, |h| p.z.max(h));
            Vertex {
                position: [p.x, p.y, z],
                normal: [0.0, 0.0, 1.0],
                diffuse,
                uv0: frame.uv(p.truncate()).to_array(),
                uv1: [0.0; 2],
            }
        });
        Ok(QueueStatus::Queued)
    }

    /// Queue a four-vertex quad on the terrain normal at `decal.center`.
    pub fn queue_simple_decal(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scratch: &mut ScratchBufferPool,
        decal: &SimpleDecal,
        terrain: &dyn HeightField,
        view: Mat4,
        stats: &mut ShadowStats,
    ) -> Result<QueueStatus, RenderError> {
        let key = BatchKey {
            texture: decal.texture,
            kind: decal.kind,
        };
        if self.batcher.reserve(device, scratch, key, 4, 6, view, stats)? == Reserve::TooLarge {
            return Ok(QueueStatus::TooLarge);
        }

        let normal = terrain.normal_at(decal.center);
        let origin = decal.center.extend(terrain.height_at(decal.center));
        let u = decal.direction.normalize_or(Vec2::X).extend(0.0);
        let tangent = (u - normal * normal.dot(u)).normalize_or(normal.any_orthonormal_vector());
        let bitangent = normal.cross(tangent);
        let ht = tangent * (decal.size.x * 0.5);
        let hb = bitangent * (decal.size.y * 0.5);

        let buffer = scratch.get_mut(ScratchKind::Decal);
        let base = buffer.base_vertex();
        let corners = [
            (origin - ht - hb, [0.0, 1.0]),
            (origin + ht - hb, [1.0, 1.0]),
            (origin + ht + hb, [1.0, 0.0]),
            (origin - ht + hb, [0.0, 0.0]),
        ];
        for (position, uv0) in corners {
            buffer.push_vertex(Vertex {
                position: position.to_array(),
                normal: normal.to_array(),
                diffuse: decal.diffuse,
                uv0,
                uv1: [0.0; 2],
            });
        }
        buffer.push_triangle(base, base + 1, base + 2);
        buffer.push_triangle(base, base + 2, base + 3);
        Ok(QueueStatus::Queued)
    }

    /// Queue every decal of both lists and draw them.
    pub fn render_decals(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scratch: &mut ScratchBufferPool,
        registry: &ShadowRegistry,
        terrain: &dyn HeightField,
        view: Mat4,
        stats: &mut ShadowStats,
    ) -> Result<(), RenderError> {
        for list in [ShadowList::Casting, ShadowList::Standalone] {
            for handle in registry.iter(list) {
                match self.queue_decal(device, scratch, registry, handle, terrain, view, stats)? {
                    QueueStatus::Culled | QueueStatus::TooLarge => stats.culled += 1,
                    QueueStatus::Queued | QueueStatus::Skipped => {}
                }
            }
        }
        self.flush(device, scratch, view, stats)
    }

    pub fn flush(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scratch: &mut ScratchBufferPool,
        view: Mat4,
        stats: &mut ShadowStats,
    ) -> Result<(), RenderError> {
        self.batcher.flush(device, scratch, view, stats)
    }

    pub fn discard(&mut self, scratch: &mut ScratchBufferPool) {
        self.batcher.discard(scratch);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::asset::{TextureOptions, TextureProvider};
    use crate::renderer::{HeadlessDevice, ObjectId};
    use crate::scene::{GridHeightField, Sphere};
    use crate::shadow::registry::ShadowTypeInfo;

    struct Images;

    impl TextureProvider for Images {
        fn load(&mut self, name: &str, _options: TextureOptions) -> Option<TextureHandle> {
            Some(TextureHandle(500 + name.len() as u32))
        }
    }

    struct Crate {
        transform: Mat4,
    }

    impl ShadowCaster for Crate {
        fn object_id(&self) -> ObjectId {
            ObjectId(7)
        }

        fn transform(&self) -> Mat4 {
            self.transform
        }

        fn bounding_sphere(&self) -> Sphere {
            Sphere::new(self.transform.w_axis.truncate(), 1.7)
        }

        fn bounding_box(&self) -> Aabb {
            Aabb::from_center_extent(Vec3::ZERO, Vec3::ONE)
        }
    }

    fn current(registry: &mut ShadowRegistry, handle: ShadowHandle) {
        registry.get_mut(handle).unwrap().set_state(ShadowState::Current);
    }

    fn strip(name: &str, position: Vec3, size: Vec2) -> ShadowTypeInfo {
        ShadowTypeInfo {
            kind: ShadowKind::AlphaDecal,
            texture_name: Some(name.to_string()),
            size,
            position,
            ..ShadowTypeInfo::default()
        }
    }

    #[test]
    fn basis_falls_back_when_axes_degenerate() {
        let yaw = Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2);
        assert!(decal_basis(yaw).abs_diff_eq(Vec2::Y, 1e-6));

        let nose_down = Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2);
        assert!(decal_basis(nose_down).abs_diff_eq(Vec2::X, 1e-6));

        assert_eq!(decal_basis(Mat4::ZERO), Vec2::X);
    }

    #[test]
    fn wide_decals_are_trimmed_to_the_cell_budget() {
        let mut device = HeadlessDevice::new();
        let mut scratch = ScratchBufferPool::default();
        let mut registry = ShadowRegistry::new(64);
        let terrain = GridHeightField::flat(200, 200, 1.0, 0.0);
        let h = registry
            .add_decal(&mut Images, &strip("Road", Vec3::new(100.0, 100.0, 0.0), Vec2::new(130.0, 10.0)))
            .unwrap();
        current(&mut registry, h);

        let mut tess = DecalTessellator::new(104);
        let mut stats = ShadowStats::default();
        let status = tess
            .queue_decal(&mut device, &mut scratch, &registry, h, &terrain, Mat4::IDENTITY, &mut stats)
            .unwrap();
        assert_eq!(status, QueueStatus::Queued);

        let buffer = scratch.get(ScratchKind::Decal);
        assert_eq!(buffer.vertex_count(), 105 * 11);
        assert_eq!(buffer.indices().len(), 104 * 10 * 6);
        assert!(buffer.indices().iter().all(|&i| (i as usize) < buffer.vertex_count()));
        let xs: Vec<f32> = buffer.vertices().iter().map(|v| v.position[0]).collect();
        assert_eq!(xs.iter().cloned().fold(f32::INFINITY, f32::min), 48.0);
        assert_eq!(xs.iter().cloned().fold(f32::NEG_INFINITY, f32::max), 152.0);
    }

    #[test]
    fn texture_or_kind_change_starts_a_new_batch() {
        let mut device = HeadlessDevice::new();
        let mut scratch = ScratchBufferPool::default();
        let mut registry = ShadowRegistry::new(64);
        let terrain = GridHeightField::flat(64, 64, 1.0, 0.0);
        let size = Vec2::splat(4.0);
        let infos = [
            strip("A", Vec3::new(10.0, 10.0, 0.0), size),
            strip("A", Vec3::new(20.0, 10.0, 0.0), size),
            strip("BB", Vec3::new(30.0, 10.0, 0.0), size),
            ShadowTypeInfo {
                kind: ShadowKind::AdditiveDecal,
                ..strip("BB", Vec3::new(40.0, 10.0, 0.0), size)
            },
        ];
        for info in &infos {
            let h = registry.add_decal(&mut Images, info).unwrap();
            current(&mut registry, h);
        }

        let mut tess = DecalTessellator::new(104);
        let mut stats = ShadowStats::default();
        tess.render_decals(&mut device, &mut scratch, &registry, &terrain, Mat4::IDENTITY, &mut stats)
            .unwrap();

        assert_eq!(stats.decal_batches, 3);
        assert_eq!(device.draws().len(), 3);
        let blends: Vec<_> = device.draws().iter().map(|d| d.state.shader.blend).collect();
        assert!(blends.contains(&ShadowKind::AdditiveDecal.blend()));
        assert!(scratch.get(ScratchKind::Decal).is_empty());
    }

    #[test]
    fn offset_is_dropped_when_it_leaves_the_caster() {
        let mut registry = ShadowRegistry::new(64);
        let caster: Rc<dyn ShadowCaster> = Rc::new(Crate {
            transform: Mat4::from_translation(Vec3::new(10.0, 10.0, 0.0)),
        });
        let mut device = HeadlessDevice::new();
        let h = registry
            .add_shadow(
                &mut device,
                &mut Images,
                &caster,
                &ShadowTypeInfo {
                    kind: ShadowKind::AlphaDecal,
                    texture_name: Some("Blob".into()),
                    size: Vec2::splat(4.0),
                    offset: Vec2::new(5.0, 0.5),
                    ..ShadowTypeInfo::default()
                },
            )
            .unwrap();
        let shadow = registry.get(h).unwrap();
        let texture = registry.textures().get(shadow.texture()).unwrap();

        let frame = DecalFrame::resolve(shadow, Some(caster.as_ref()), texture).unwrap();
        assert!(frame.center.abs_diff_eq(Vec2::new(10.0, 10.5), 1e-6));
        assert!(frame.uv(Vec2::new(8.0, 12.5)).abs_diff_eq(Vec2::new(0.0, 0.0), 1e-6));
    }

    #[test]
    fn layer_height_lifts_the_decal() {
        let mut device = HeadlessDevice::new();
        let mut scratch = ScratchBufferPool::default();
        let mut registry = ShadowRegistry::new(64);
        let terrain = GridHeightField::flat(32, 32, 1.0, 2.0);
        let info = ShadowTypeInfo {
            layer_height: Some(5.0),
            ..strip("Bridge", Vec3::new(10.0, 10.0, 0.0), Vec2::splat(2.0))
        };
        let h = registry.add_decal(&mut Images, &info).unwrap();
        current(&mut registry, h);

        let mut tess = DecalTessellator::new(104);
        let mut stats = ShadowStats::default();
        tess.queue_decal(&mut device, &mut scratch, &registry, h, &terrain, Mat4::IDENTITY, &mut stats)
            .unwrap();
        assert!(scratch.get(ScratchKind::Decal).vertices().iter().all(|v| v.z() == 5.0));
    }

    #[test]
    fn simple_decal_is_one_quad() {
        let mut device = HeadlessDevice::new();
        let mut scratch = ScratchBufferPool::default();
        let terrain = GridHeightField::flat(16, 16, 1.0, 1.0);
        let mut tess = DecalTessellator::new(104);
        let mut stats = ShadowStats::default();
        let decal = SimpleDecal {
            texture: TextureHandle(3),
            kind: ShadowKind::AlphaDecal,
            center: Vec2::new(4.0, 4.0),
            direction: Vec2::X,
            size: Vec2::new(2.0, 1.0),
            diffuse: u32::MAX,
        };
        let status = tess
            .queue_simple_decal(&mut device, &mut scratch, &decal, &terrain, Mat4::IDENTITY, &mut stats)
            .unwrap();
        assert_eq!(status, QueueStatus::Queued);

        let buffer = scratch.get(ScratchKind::Decal);
        assert_eq!(buffer.indices(), &[0, 1, 2, 0, 2, 3]);
        assert!(Vec3::from(buffer.vertices()[0].position).abs_diff_eq(Vec3::new(3.0, 3.5, 1.0), 1e-5));
        assert!(Vec3::from(buffer.vertices()[2].position).abs_diff_eq(Vec3::new(5.0, 4.5, 1.0), 1e-5));
    }
}

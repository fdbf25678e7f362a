use std::collections::{HashMap, HashSet};

use glam::{Mat3, Mat4, Vec2, Vec3};

use crate::asset::{Arena, Handle, TextureOptions, TextureProvider};
use crate::renderer::{GraphicsDevice, RenderError, TextureHandle};
use crate::scene::{Aabb, Sphere};

/// Longest cache key kept; longer names are truncated.
pub const MAX_SHADOW_NAME_LEN: usize = 64;

/// Shallowest light elevation used when stretching shadow bounds, so a light
/// at the horizon does not produce unbounded shadows.
const MIN_LIGHT_ELEVATION: f32 = 0.2;

pub fn cache_key(name: &str) -> &str {
    if name.len() <= MAX_SHADOW_NAME_LEN {
        return name;
    }
    let mut end = MAX_SHADOW_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSource {
    /// Image owned by the asset manager.
    Premade,
    /// Render target this cache created and owns.
    Rendered { size: u32 },
}

/// An image shared by every shadow instance that uses the same geometry or
/// decal name.
#[derive(Debug, Clone)]
pub struct ShadowTexture {
    name: String,
    source: TextureSource,
    texture: Option<TextureHandle>,
    ref_count: u32,
    last_light_position: Option<Vec3>,
    last_object_orientation: Option<Mat3>,
    area_sphere: Sphere,
    area_box: Aabb,
    uv_axes: [Vec3; 2],
    local_light_dir: Vec2,
    renders: u32,
}

impl ShadowTexture {
    pub fn new(name: &str, source: TextureSource, texture: TextureHandle) -> Self {
        Self {
            name: cache_key(name).to_string(),
            source,
            texture: Some(texture),
            ref_count: 0,
            last_light_position: None,
            last_object_orientation: None,
            area_sphere: Sphere::new(Vec3::ZERO, 0.0),
            area_box: Aabb::from_center_extent(Vec3::ZERO, Vec3::ZERO),
            uv_axes: [Vec3::X, Vec3::Y],
            local_light_dir: Vec2::X,
            renders: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> TextureSource {
        self.source
    }

    /// `None` while device resources are released.
    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn last_light_position(&self) -> Option<Vec3> {
        self.last_light_position
    }

    pub fn last_object_orientation(&self) -> Option<Mat3> {
        self.last_object_orientation
    }

    /// Area of effect relative to the caster origin.
    pub fn area_sphere(&self) -> Sphere {
        self.area_sphere
    }

    /// Area of effect relative to the caster origin.
    pub fn area_box(&self) -> Aabb {
        self.area_box
    }

    /// Area of effect for a caster standing at `origin`.
    pub fn world_bounds(&self, origin: Vec3) -> (Sphere, Aabb) {
        (
            self.area_sphere.translated(origin),
            self.area_box.translated(origin),
        )
    }

    pub fn uv_axes(&self) -> [Vec3; 2] {
        self.uv_axes
    }

    /// Horizontal light direction in the caster's own frame.
    pub fn local_light_dir(&self) -> Vec2 {
        self.local_light_dir
    }

    /// How many times the silhouette has been rendered into this texture.
    pub fn renders(&self) -> u32 {
        self.renders
    }

    /// Exact comparison against the light and orientation this texture was
    /// last generated for.
    pub fn is_current(&self, light_position: Vec3, orientation: Mat3) -> bool {
        self.last_light_position == Some(light_position)
            && self.last_object_orientation == Some(orientation)
    }

    pub fn invalidate_light_history(&mut self) {
        self.last_light_position = None;
        self.last_object_orientation = None;
    }

    pub(crate) fn record_render(&mut self, light_position: Vec3, orientation: Mat3) {
        self.last_light_position = Some(light_position);
        self.last_object_orientation = Some(orientation);
        self.renders += 1;
    }

    /// Recompute the area a projected shadow covers.
    ///
    /// The caster's box is swept along the light direction down to the
    /// plane of its lowest corner.
    pub fn update_bounds(&mut self, light_position: Vec3, transform: Mat4, local_box: Aabb) {
        let orientation = Mat3::from_mat4(transform);
        let origin = transform.w_axis.truncate();

        let corners = box_corners(&local_box).map(|c| orientation * c);
        let center = orientation * local_box.center();
        let ground = corners.iter().fold(f32::INFINITY, |z, c| z.min(c.z));

        let mut dir = (origin + center - light_position).normalize_or(Vec3::NEG_Z);
        if dir.z > -MIN_LIGHT_ELEVATION {
            dir.z = -MIN_LIGHT_ELEVATION;
            dir = dir.normalize();
        }

        let mut area = Aabb::from_points(&corners);
        for corner in corners {
            let t = (ground - corner.z) / dir.z;
            area = area.including(corner + dir * t);
        }
        self.area_box = area;
        self.area_sphere = area.bounding_sphere();
    }

    /// Rotate the decal UV basis to follow the light.
    pub fn update_decal_axes(&mut self, light_position: Vec3, transform: Mat4) {
        let orientation = Mat3::from_mat4(transform);
        let origin = transform.w_axis.truncate();
        let to_object = origin - light_position;

        let horizontal = Vec2::new(to_object.x, to_object.y).normalize_or(Vec2::X);
        self.uv_axes = [
            horizontal.extend(0.0),
            Vec3::new(-horizontal.y, horizontal.x, 0.0),
        ];

        let local = if orientation.determinant().abs() > f32::EPSILON {
            orientation.inverse() * to_object
        } else {
            to_object
        };
        self.local_light_dir = Vec2::new(local.x, local.y).normalize_or(Vec2::X);

        self.last_light_position = Some(light_position);
        self.last_object_orientation = Some(orientation);
    }
}

fn box_corners(aabb: &Aabb) -> [Vec3; 8] {
    let (lo, hi) = (aabb.min, aabb.max);
    [
        Vec3::new(lo.x, lo.y, lo.z),
        Vec3::new(hi.x, lo.y, lo.z),
        Vec3::new(hi.x, hi.y, lo.z),
        Vec3::new(lo.x, hi.y, lo.z),
        Vec3::new(lo.x, lo.y, hi.z),
        Vec3::new(hi.x, lo.y, hi.z),
        Vec3::new(hi.x, hi.y, hi.z),
        Vec3::new(lo.x, hi.y, hi.z),
    ]
}

pub type ShadowTextureHandle = Handle<ShadowTexture>;

/// Reference-counted shadow textures by name, plus the names that failed to
/// load.
#[derive(Default)]
pub struct ShadowTextureCache {
    textures: Arena<ShadowTexture>,
    by_name: HashMap<String, ShadowTextureHandle>,
    missing: HashSet<String>,
}

impl ShadowTextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn get(&self, handle: ShadowTextureHandle) -> Option<&ShadowTexture> {
        self.textures.get(handle)
    }

    pub fn get_mut(&mut self, handle: ShadowTextureHandle) -> Option<&mut ShadowTexture> {
        self.textures.get_mut(handle)
    }

    pub fn find(&self, name: &str) -> Option<ShadowTextureHandle> {
        self.by_name.get(cache_key(name)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ShadowTextureHandle, &ShadowTexture)> {
        self.textures.iter()
    }

    pub fn is_missing(&self, name: &str) -> bool {
        self.missing.contains(cache_key(name))
    }

    pub fn mark_missing(&mut self, name: &str) {
        if self.missing.insert(cache_key(name).to_string()) {
            log::warn!("Shadow texture '{}' could not be loaded", name);
        }
    }

    /// Take a reference to `name`, loading or creating it on a miss.
    ///
    /// `create` runs at most once per name; a `None` from it is remembered
    /// and later requests fail without retrying.
    pub fn acquire_with(
        &mut self,
        name: &str,
        create: impl FnOnce() -> Option<ShadowTexture>,
    ) -> Option<ShadowTextureHandle> {
        if let Some(handle) = self.find(name) {
            if let Some(texture) = self.textures.get_mut(handle) {
                texture.ref_count += 1;
                return Some(handle);
            }
        }
        if self.is_missing(name) {
            return None;
        }

        let Some(mut texture) = create() else {
            self.mark_missing(name);
            return None;
        };
        texture.ref_count = 1;
        let key = texture.name.clone();
        let handle = self.textures.insert(texture);
        self.by_name.insert(key, handle);
        Some(handle)
    }

    /// Acquire a premade image through the asset manager.
    pub fn acquire_premade(
        &mut self,
        name: &str,
        provider: &mut dyn TextureProvider,
    ) -> Option<ShadowTextureHandle> {
        self.acquire_with(name, || {
            provider
                .load(name, TextureOptions::DECAL)
                .map(|texture| ShadowTexture::new(name, TextureSource::Premade, texture))
        })
    }

    /// Acquire a silhouette render target of `size` pixels.
    pub fn acquire_rendered(
        &mut self,
        name: &str,
        size: u32,
        device: &mut dyn GraphicsDevice,
    ) -> Option<ShadowTextureHandle> {
        self.acquire_with(name, || match device.create_texture(size, size) {
            Ok(texture) => Some(ShadowTexture::new(
                name,
                TextureSource::Rendered { size },
                texture,
            )),
            Err(err) => {
                log::warn!("Failed to create shadow target for '{}': {}", name, err);
                None
            }
        })
    }

    /// Drop one reference. The texture is freed when the last one goes.
    /// Returns true when it was freed.
    pub fn release(&mut self, handle: ShadowTextureHandle, device: &mut dyn GraphicsDevice) -> bool {
        let Some(texture) = self.textures.get_mut(handle) else {
            return false;
        };
        texture.ref_count = texture.ref_count.saturating_sub(1);
        if texture.ref_count > 0 {
            return false;
        }
        if let Some(texture) = self.textures.remove(handle) {
            self.by_name.remove(&texture.name);
            destroy_owned(&texture, device);
        }
        true
    }

    pub fn invalidate_light_history(&mut self) {
        for (_, texture) in self.textures.iter_mut() {
            texture.invalidate_light_history();
        }
    }

    /// Free device resources but keep the entries, so they can be recreated.
    pub fn release_device_resources(&mut self, device: &mut dyn GraphicsDevice) {
        for (_, texture) in self.textures.iter_mut() {
            destroy_owned(texture, device);
            texture.texture = None;
            texture.invalidate_light_history();
        }
    }

    /// Recreate what [`release_device_resources`](Self::release_device_resources)
    /// freed. Returns how many entries could not be restored.
    pub fn reacquire_device_resources(
        &mut self,
        device: &mut dyn GraphicsDevice,
        provider: &mut dyn TextureProvider,
    ) -> Result<usize, RenderError> {
        let mut failed = 0;
        for (_, texture) in self.textures.iter_mut() {
            if texture.texture.is_some() {
                continue;
            }
            texture.texture = match texture.source {
                TextureSource::Premade => provider.load(&texture.name, TextureOptions::DECAL),
                TextureSource::Rendered { size } => Some(device.create_texture(size, size)?),
            };
            if texture.texture.is_none() {
                log::warn!("Shadow texture '{}' could not be restored", texture.name);
                failed += 1;
            }
        }
        Ok(failed)
    }

    /// Free everything, including the missing-asset memo.
    pub fn release_all(&mut self, device: &mut dyn GraphicsDevice) {
        for (_, texture) in self.textures.iter() {
            destroy_owned(texture, device);
        }
        self.textures.clear();
        self.by_name.clear();
        self.missing.clear();
    }
}

fn destroy_owned(texture: &ShadowTexture, device: &mut dyn GraphicsDevice) {
    if let (TextureSource::Rendered { .. }, Some(handle)) = (texture.source, texture.texture) {
        device.destroy_texture(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::HeadlessDevice;

    #[test]
    fn long_names_truncate_on_char_boundary() {
        let name = "é".repeat(40);
        let key = cache_key(&name);
        assert!(key.len() <= MAX_SHADOW_NAME_LEN);
        assert_eq!(key.len(), 64);
        assert_eq!(cache_key("Tank"), "Tank");
    }

    #[test]
    fn rendered_textures_are_shared_and_freed_with_last_ref() {
        let mut device = HeadlessDevice::new();
        let mut cache = ShadowTextureCache::new();
        let a = cache.acquire_rendered("Tank", 64, &mut device).unwrap();
        let b = cache.acquire_rendered("Tank", 64, &mut device).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.get(a).unwrap().ref_count(), 2);
        assert_eq!(device.live_textures(), 1);
        // Silhouettes are copied in; only the shared target is renderable.
        let image = device.texture(cache.get(a).unwrap().texture().unwrap()).unwrap();
        assert!(!image.render_target);
        assert_eq!((image.width, image.height), (64, 64));

        assert!(!cache.release(a, &mut device));
        assert!(cache.release(b, &mut device));
        assert!(cache.is_empty());
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn failed_creation_is_memoised() {
        let mut cache = ShadowTextureCache::new();
        let mut attempts = 0;
        for _ in 0..3 {
            let handle = cache.acquire_with("Crater", || {
                attempts += 1;
                None
            });
            assert!(handle.is_none());
        }
        assert_eq!(attempts, 1);
        assert!(cache.is_missing("Crater"));
    }

    #[test]
    fn bounds_stretch_away_from_the_light() {
        let mut texture = ShadowTexture::new("Tower", TextureSource::Premade, TextureHandle(1));
        let local = Aabb::from_min_max(Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 10.0));
        // Light high up in -x, so the shadow falls towards +x.
        texture.update_bounds(Vec3::new(-100.0, 0.0, 100.0), Mat4::IDENTITY, local);
        let area = texture.area_box();
        assert!(area.max.x > 5.0);
        assert!((area.min.x + 1.0).abs() < 1e-5);
        assert!(area.min.z.abs() < 1e-4);
    }

    #[test]
    fn decal_axes_follow_light_in_object_frame() {
        let mut texture = ShadowTexture::new("Blob", TextureSource::Premade, TextureHandle(1));
        let turned = Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2);
        texture.update_decal_axes(Vec3::new(-10.0, 0.0, 10.0), turned);

        assert!(texture.uv_axes()[0].abs_diff_eq(Vec3::X, 1e-5));
        // World +x seen from an object turned a quarter left is local -y.
        assert!(texture.local_light_dir().abs_diff_eq(Vec2::new(0.0, -1.0), 1e-5));
        assert!(texture.is_current(Vec3::new(-10.0, 0.0, 10.0), Mat3::from_mat4(turned)));
    }
}

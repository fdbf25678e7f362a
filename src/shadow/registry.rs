use std::rc::{Rc, Weak};

use glam::{Mat4, Vec2, Vec3};

use crate::asset::{Arena, Handle, TextureProvider};
use crate::renderer::vertex::pack_argb;
use crate::renderer::{BlendMode, GraphicsDevice};
use crate::scene::ShadowCaster;
use crate::shadow::texture::{ShadowTextureCache, ShadowTextureHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowKind {
    /// Silhouette rendered from the light and projected onto the terrain.
    Projection,
    /// Premade blob image under the caster, multiplied onto the terrain.
    Decal,
    AlphaDecal,
    AdditiveDecal,
}

impl ShadowKind {
    pub fn is_decal(self) -> bool {
        !matches!(self, Self::Projection)
    }

    pub fn list(self) -> ShadowList {
        match self {
            Self::Projection | Self::Decal => ShadowList::Casting,
            Self::AlphaDecal | Self::AdditiveDecal => ShadowList::Standalone,
        }
    }

    pub fn blend(self) -> BlendMode {
        match self {
            Self::Projection | Self::Decal => BlendMode::Multiply,
            Self::AlphaDecal => BlendMode::Alpha,
            Self::AdditiveDecal => BlendMode::Additive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowList {
    Casting,
    Standalone,
}

/// Per-instance lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowState {
    Uninitialized,
    /// Texture attached, never generated for a light.
    TextureBound,
    Current,
    /// Light or caster moved since the last update.
    Stale,
}

/// Creation parameters for a shadow or decal.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowTypeInfo {
    pub kind: ShadowKind,
    /// Image name for decals; shared geometry name for projections.
    pub texture_name: Option<String>,
    /// Decal footprint. Zero takes the caster's box.
    pub size: Vec2,
    /// Decal centre offset along its own U and V axes.
    pub offset: Vec2,
    pub color: [u8; 3],
    pub opacity: f32,
    /// Placement for decals without a caster.
    pub position: Vec3,
    pub angle: f32,
    /// Height of a raised surface (bridge) the decal sits on.
    pub layer_height: Option<f32>,
}

impl Default for ShadowTypeInfo {
    fn default() -> Self {
        Self {
            kind: ShadowKind::Decal,
            texture_name: None,
            size: Vec2::ZERO,
            offset: Vec2::ZERO,
            color: [u8::MAX; 3],
            opacity: 1.0,
            position: Vec3::ZERO,
            angle: 0.0,
            layer_height: None,
        }
    }
}

/// Light-space matrices of a projection shadow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projector {
    /// Caster space to light view.
    pub view: Mat4,
    pub projection: Mat4,
    /// World position to shadow texture coordinates.
    pub texture_matrix: Mat4,
}

impl Default for Projector {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            texture_matrix: Mat4::IDENTITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShadowSource {
    Projector(Projector),
    Decal,
}

pub type ShadowHandle = Handle<ProjectedShadow>;

/// One shadow or decal instance.
pub struct ProjectedShadow {
    kind: ShadowKind,
    caster: Option<Weak<dyn ShadowCaster>>,
    texture: ShadowTextureHandle,
    source: ShadowSource,
    state: ShadowState,
    pub(crate) last_caster_transform: Option<Mat4>,
    decal_size: Vec2,
    offset: Vec2,
    color: [u8; 3],
    opacity: f32,
    position: Vec3,
    angle: f32,
    layer_height: Option<f32>,
    enabled: bool,
    invisible_enabled: bool,
    next: Option<ShadowHandle>,
}

impl ProjectedShadow {
    fn new(
        info: &ShadowTypeInfo,
        caster: Option<&Rc<dyn ShadowCaster>>,
        texture: ShadowTextureHandle,
    ) -> Self {
        let source = match info.kind {
            ShadowKind::Projection => ShadowSource::Projector(Projector::default()),
            _ => ShadowSource::Decal,
        };
        let mut decal_size = info.size;
        if let Some(caster) = caster {
            let extent = caster.bounding_box().extent() * 2.0;
            if decal_size.x <= 0.0 {
                decal_size.x = extent.x;
            }
            if decal_size.y <= 0.0 {
                decal_size.y = extent.y;
            }
        }
        Self {
            kind: info.kind,
            caster: caster.map(Rc::downgrade),
            texture,
            source,
            state: ShadowState::Uninitialized,
            last_caster_transform: None,
            decal_size,
            offset: info.offset,
            color: info.color,
            opacity: info.opacity.clamp(0.0, 1.0),
            position: info.position,
            angle: info.angle,
            layer_height: info.layer_height,
            enabled: true,
            invisible_enabled: false,
            next: None,
        }
    }

    pub fn kind(&self) -> ShadowKind {
        self.kind
    }

    pub fn texture(&self) -> ShadowTextureHandle {
        self.texture
    }

    pub fn source(&self) -> &ShadowSource {
        &self.source
    }

    pub fn projector(&self) -> Option<&Projector> {
        match &self.source {
            ShadowSource::Projector(projector) => Some(projector),
            ShadowSource::Decal => None,
        }
    }

    pub(crate) fn projector_mut(&mut self) -> Option<&mut Projector> {
        match &mut self.source {
            ShadowSource::Projector(projector) => Some(projector),
            ShadowSource::Decal => None,
        }
    }

    pub fn state(&self) -> ShadowState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ShadowState) {
        self.state = state;
    }

    /// `None` for standalone decals or once the caster is gone.
    pub fn caster(&self) -> Option<Rc<dyn ShadowCaster>> {
        self.caster.as_ref()?.upgrade()
    }

    pub fn has_caster(&self) -> bool {
        self.caster.is_some()
    }

    pub fn is_attached_to(&self, caster: &Rc<dyn ShadowCaster>) -> bool {
        self.caster().is_some_and(|c| Rc::ptr_eq(&c, caster))
    }

    pub fn decal_size(&self) -> Vec2 {
        self.decal_size
    }

    pub fn set_decal_size(&mut self, size: Vec2) {
        self.decal_size = size.max(Vec2::ZERO);
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Vec2) {
        self.offset = offset;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn set_angle(&mut self, angle: f32) {
        self.angle = angle;
    }

    pub fn layer_height(&self) -> Option<f32> {
        self.layer_height
    }

    pub fn set_layer_height(&mut self, height: Option<f32>) {
        self.layer_height = height;
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn set_color(&mut self, color: [u8; 3]) {
        self.color = color;
    }

    /// Packed vertex colour. Additive decals fade by darkening instead of
    /// through alpha.
    pub fn diffuse(&self) -> u32 {
        let alpha = (self.opacity * 255.0).round() as u8;
        let [r, g, b] = self.color;
        match self.kind {
            ShadowKind::AdditiveDecal => {
                let scale = |c: u8| (c as f32 * self.opacity).round() as u8;
                pack_argb(scale(r), scale(g), scale(b), u8::MAX)
            }
            _ => pack_argb(r, g, b, alpha),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the shadow is still drawn while its caster is hidden.
    pub fn invisible_enabled(&self) -> bool {
        self.invisible_enabled
    }

    pub fn set_invisible_enabled(&mut self, enabled: bool) {
        self.invisible_enabled = enabled;
    }

    pub fn next(&self) -> Option<ShadowHandle> {
        self.next
    }
}

/// Live shadows in two singly linked lists over one arena, plus their
/// texture cache.
pub struct ShadowRegistry {
    shadows: Arena<ProjectedShadow>,
    casting_head: Option<ShadowHandle>,
    standalone_head: Option<ShadowHandle>,
    textures: ShadowTextureCache,
    num_decal_shadows: usize,
    num_projection_shadows: usize,
    texture_size: u32,
}

impl ShadowRegistry {
    pub fn new(texture_size: u32) -> Self {
        Self {
            shadows: Arena::new(),
            casting_head: None,
            standalone_head: None,
            textures: ShadowTextureCache::new(),
            num_decal_shadows: 0,
            num_projection_shadows: 0,
            texture_size,
        }
    }

    pub fn num_decal_shadows(&self) -> usize {
        self.num_decal_shadows
    }

    pub fn num_projection_shadows(&self) -> usize {
        self.num_projection_shadows
    }

    pub fn len(&self) -> usize {
        self.shadows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shadows.is_empty()
    }

    pub fn textures(&self) -> &ShadowTextureCache {
        &self.textures
    }

    pub fn textures_mut(&mut self) -> &mut ShadowTextureCache {
        &mut self.textures
    }

    pub fn get(&self, handle: ShadowHandle) -> Option<&ProjectedShadow> {
        self.shadows.get(handle)
    }

    pub fn get_mut(&mut self, handle: ShadowHandle) -> Option<&mut ProjectedShadow> {
        self.shadows.get_mut(handle)
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Arena<ProjectedShadow>, &mut ShadowTextureCache) {
        (&mut self.shadows, &mut self.textures)
    }

    pub fn head(&self, list: ShadowList) -> Option<ShadowHandle> {
        match list {
            ShadowList::Casting => self.casting_head,
            ShadowList::Standalone => self.standalone_head,
        }
    }

    /// Handles of one list in link order.
    pub fn iter(&self, list: ShadowList) -> impl Iterator<Item = ShadowHandle> + '_ {
        let mut cursor = self.head(list);
        std::iter::from_fn(move || {
            let handle = cursor?;
            cursor = self.shadows.get(handle)?.next;
            Some(handle)
        })
    }

    pub fn contains(&self, list: ShadowList, handle: ShadowHandle) -> bool {
        self.iter(list).any(|h| h == handle)
    }

    /// Attach a shadow of `info.kind` to `caster`.
    ///
    /// Projection shadows share one silhouette texture per geometry name, or
    /// per object when the caster has none. Decal kinds load their image
    /// through `provider`. Returns `None` when the texture is unavailable.
    pub fn add_shadow(
        &mut self,
        device: &mut dyn GraphicsDevice,
        provider: &mut dyn TextureProvider,
        caster: &Rc<dyn ShadowCaster>,
        info: &ShadowTypeInfo,
    ) -> Option<ShadowHandle> {
        if info.kind.is_decal() {
            return self.create_decal_shadow(provider, Some(caster), info);
        }

        let name = match (&info.texture_name, caster.geometry_name()) {
            (Some(name), _) => name.clone(),
            (None, Some(name)) => name.to_string(),
            (None, None) => format!("#object{}", caster.object_id().0),
        };
        let texture = self
            .textures
            .acquire_rendered(&name, self.texture_size, device)?;
        let shadow = ProjectedShadow::new(info, Some(caster), texture);
        Some(self.link(shadow))
    }

    /// Standalone decal at `info.position` / `info.angle`.
    pub fn add_decal(
        &mut self,
        provider: &mut dyn TextureProvider,
        info: &ShadowTypeInfo,
    ) -> Option<ShadowHandle> {
        self.create_decal_shadow(provider, None, info)
    }

    /// Decal of any decal kind, optionally following a caster.
    pub fn create_decal_shadow(
        &mut self,
        provider: &mut dyn TextureProvider,
        caster: Option<&Rc<dyn ShadowCaster>>,
        info: &ShadowTypeInfo,
    ) -> Option<ShadowHandle> {
        if !info.kind.is_decal() {
            log::warn!("create_decal_shadow called with {:?}", info.kind);
            return None;
        }
        let Some(name) = info.texture_name.as_deref() else {
            log::warn!("Decal shadow without a texture name ignored");
            return None;
        };
        let texture = self.textures.acquire_premade(name, provider)?;
        let shadow = ProjectedShadow::new(info, caster, texture);
        Some(self.link(shadow))
    }

    fn link(&mut self, mut shadow: ProjectedShadow) -> ShadowHandle {
        shadow.state = ShadowState::TextureBound;
        let list = shadow.kind.list();
        let texture = shadow.texture;
        match shadow.kind {
            ShadowKind::Projection => self.num_projection_shadows += 1,
            _ => self.num_decal_shadows += 1,
        }

        // Keep instances of one texture next to each other.
        let neighbour = self
            .iter(list)
            .find(|&h| self.shadows.get(h).is_some_and(|s| s.texture == texture));

        match neighbour {
            Some(prev) => {
                shadow.next = self.shadows.get(prev).and_then(|s| s.next);
                let handle = self.shadows.insert(shadow);
                if let Some(prev) = self.shadows.get_mut(prev) {
                    prev.next = Some(handle);
                }
                handle
            }
            None => {
                shadow.next = self.head(list);
                let handle = self.shadows.insert(shadow);
                self.set_head(list, Some(handle));
                handle
            }
        }
    }

    fn set_head(&mut self, list: ShadowList, head: Option<ShadowHandle>) {
        match list {
            ShadowList::Casting => self.casting_head = head,
            ShadowList::Standalone => self.standalone_head = head,
        }
    }

    /// Unlink and destroy one shadow. Returns false for stale handles.
    pub fn remove_shadow(&mut self, device: &mut dyn GraphicsDevice, handle: ShadowHandle) -> bool {
        let Some(shadow) = self.shadows.get(handle) else {
            return false;
        };
        let list = shadow.kind.list();
        let next = shadow.next;

        let mut prev = None;
        let mut cursor = self.head(list);
        while let Some(current) = cursor {
            if current == handle {
                break;
            }
            prev = Some(current);
            cursor = self.shadows.get(current).and_then(|s| s.next);
        }
        if cursor.is_none() {
            log::error!("Shadow {:?} not found in its {:?} list", handle, list);
            return false;
        }
        match prev.and_then(|p| self.shadows.get_mut(p)) {
            Some(prev) => prev.next = next,
            None => self.set_head(list, next),
        }

        let Some(shadow) = self.shadows.remove(handle) else {
            return false;
        };
        self.forget(&shadow, device);
        true
    }

    /// Remove every shadow attached to `caster`.
    pub fn remove_caster(&mut self, device: &mut dyn GraphicsDevice, caster: &Rc<dyn ShadowCaster>) -> usize {
        let mut removed = 0;
        for list in [ShadowList::Casting, ShadowList::Standalone] {
            let mut cursor = self.head(list);
            while let Some(handle) = cursor {
                let Some(shadow) = self.shadows.get(handle) else {
                    break;
                };
                cursor = shadow.next;
                if shadow.is_attached_to(caster) && self.remove_shadow(device, handle) {
                    removed += 1;
                }
            }
        }
        removed
    }

    fn forget(&mut self, shadow: &ProjectedShadow, device: &mut dyn GraphicsDevice) {
        match shadow.kind {
            ShadowKind::Projection => {
                self.num_projection_shadows = self.num_projection_shadows.saturating_sub(1)
            }
            _ => self.num_decal_shadows = self.num_decal_shadows.saturating_sub(1),
        }
        self.textures.release(shadow.texture, device);
    }

    /// Tear down both lists and force every texture to regenerate.
    pub fn remove_all_shadows(&mut self, device: &mut dyn GraphicsDevice) {
        for (_, shadow) in self.shadows.iter() {
            self.textures.release(shadow.texture, device);
        }
        self.shadows.clear();
        self.casting_head = None;
        self.standalone_head = None;
        self.num_decal_shadows = 0;
        self.num_projection_shadows = 0;
        self.textures.invalidate_light_history();
    }

    /// Full teardown, including the texture cache and missing-asset memo.
    pub fn reset(&mut self, device: &mut dyn GraphicsDevice) {
        self.remove_all_shadows(device);
        self.textures.release_all(device);
    }

    /// Force every shadow to regenerate on the next update.
    pub fn invalidate_light_history(&mut self) {
        self.textures.invalidate_light_history();
        for (_, shadow) in self.shadows.iter_mut() {
            shadow.last_caster_transform = None;
            if shadow.state == ShadowState::Current {
                shadow.state = ShadowState::Stale;
            }
        }
    }
}

use std::rc::Rc;

use glam::{Mat4, Vec2, Vec3};
use wgpu_sortpool::asset::{TextureOptions, TextureProvider};
use wgpu_sortpool::renderer::{HeadlessDevice, ObjectId, TextureHandle};
use wgpu_sortpool::scene::{Aabb, GridHeightField, ShadowCaster, ShadowReceiver, Sphere};
use wgpu_sortpool::shadow::{ShadowKind, ShadowState, ShadowTypeInfo};
use wgpu_sortpool::{RenderSettings, ShadowManager};

struct Tower;

impl ShadowCaster for Tower {
    fn object_id(&self) -> ObjectId {
        ObjectId(3)
    }

    fn transform(&self) -> Mat4 {
        Mat4::from_translation(Vec3::new(20.0, 20.0, 0.0))
    }

    fn bounding_sphere(&self) -> Sphere {
        Sphere::new(Vec3::new(20.0, 20.0, 2.0), 2.5)
    }

    fn bounding_box(&self) -> Aabb {
        Aabb::from_min_max(Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 4.0))
    }
}

struct Images {
    generation: u32,
}

impl TextureProvider for Images {
    fn load(&mut self, name: &str, _options: TextureOptions) -> Option<TextureHandle> {
        (name == "Scorch").then_some(TextureHandle(5000 + self.generation))
    }
}

struct Nothing;

impl ShadowReceiver for Nothing {
    fn object_id(&self) -> ObjectId {
        ObjectId(0)
    }

    fn world_bounds(&self) -> Aabb {
        Aabb::EMPTY
    }
}

const LIGHT: Vec3 = Vec3::new(25.0, 20.0, 60.0);

fn scene(device: &mut HeadlessDevice, images: &mut Images) -> (ShadowManager, Rc<dyn ShadowCaster>) {
    let mut manager = ShadowManager::new(&RenderSettings::default());
    let tower: Rc<dyn ShadowCaster> = Rc::new(Tower);
    manager
        .add_shadow(
            device,
            images,
            &tower,
            &ShadowTypeInfo {
                kind: ShadowKind::Projection,
                ..ShadowTypeInfo::default()
            },
        )
        .unwrap();
    manager
        .add_decal(
            images,
            &ShadowTypeInfo {
                kind: ShadowKind::AlphaDecal,
                texture_name: Some("Scorch".into()),
                size: Vec2::splat(4.0),
                position: Vec3::new(40.0, 40.0, 0.0),
                ..ShadowTypeInfo::default()
            },
        )
        .unwrap();
    (manager, tower)
}

#[test]
fn release_frees_everything_and_reacquire_regenerates() {
    let mut device = HeadlessDevice::new();
    let mut images = Images { generation: 0 };
    let terrain = GridHeightField::flat(64, 64, 1.0, 0.0);
    let receivers: Vec<Nothing> = Vec::new();
    let (mut manager, _tower) = scene(&mut device, &mut images);

    manager.update(&mut device, LIGHT).unwrap();
    let first = manager.render(&mut device, &terrain, &receivers, Mat4::IDENTITY).unwrap();
    assert_eq!(first.terrain_batches, 1);
    assert_eq!(first.decal_batches, 1);
    assert!(device.live_buffers() > 0);

    manager.release_resources(&mut device);
    assert!(manager.is_released());
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.live_textures(), 0);
    for handle in manager.registry().iter(wgpu_sortpool::shadow::ShadowList::Casting) {
        assert_eq!(manager.registry().get(handle).unwrap().state(), ShadowState::Stale);
    }

    device.clear_records();
    let idle = manager.render(&mut device, &terrain, &receivers, Mat4::IDENTITY).unwrap();
    assert_eq!(idle.terrain_batches + idle.decal_batches, 0);
    assert!(device.draws().is_empty());
    assert_eq!(manager.update(&mut device, LIGHT).unwrap().textures_updated, 0);

    images.generation = 1;
    assert_eq!(manager.reacquire_resources(&mut device, &mut images).unwrap(), 0);
    let relit = manager.update(&mut device, LIGHT).unwrap();
    assert_eq!(relit.textures_updated, 1);

    let after = manager.render(&mut device, &terrain, &receivers, Mat4::IDENTITY).unwrap();
    assert_eq!(after.terrain_batches, 1);
    assert_eq!(after.decal_batches, 1);
    assert!(device
        .draws()
        .iter()
        .any(|d| d.state.textures[0] == Some(TextureHandle(5001))));
}

#[test]
fn lost_device_recovers_after_restore() {
    let mut device = HeadlessDevice::new();
    let mut images = Images { generation: 0 };
    let terrain = GridHeightField::flat(64, 64, 1.0, 0.0);
    let receivers: Vec<Nothing> = Vec::new();
    let (mut manager, _tower) = scene(&mut device, &mut images);
    manager.update(&mut device, LIGHT).unwrap();

    device.lose();
    assert!(manager.render(&mut device, &terrain, &receivers, Mat4::IDENTITY).is_err());

    manager.release_resources(&mut device);
    device.restore();
    manager.reacquire_resources(&mut device, &mut images).unwrap();
    manager.update(&mut device, LIGHT).unwrap();
    device.clear_records();

    let stats = manager.render(&mut device, &terrain, &receivers, Mat4::IDENTITY).unwrap();
    assert_eq!(stats.terrain_batches, 1);
    assert_eq!(stats.decal_batches, 1);
    assert_eq!(device.draws().len(), 2);
}

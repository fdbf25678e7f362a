use glam::Mat4;

use crate::renderer::ObjectId;
use crate::scene::bounds::{Aabb, Sphere};

/// A render object that can cast a shadow or carry a decal.
///
/// Shadows only hold weak references to casters; the scene owns them.
pub trait ShadowCaster {
    fn object_id(&self) -> ObjectId;

    /// Object to world.
    fn transform(&self) -> Mat4;

    /// World-space bounding sphere.
    fn bounding_sphere(&self) -> Sphere;

    /// Object-space bounding box.
    fn bounding_box(&self) -> Aabb;

    /// Name of shared geometry. Casters with the same name share one shadow
    /// texture; `None` keys the texture on the object itself.
    fn geometry_name(&self) -> Option<&str> {
        None
    }

    fn is_hidden(&self) -> bool {
        false
    }
}

/// Something a projected shadow can be drawn onto.
pub trait ShadowReceiver {
    fn object_id(&self) -> ObjectId;

    fn world_bounds(&self) -> Aabb;

    fn receives_shadows(&self) -> bool {
        true
    }
}

/// Spatial range queries over the scene.
pub trait PartitionQuery {
    /// Calls `visit` for every receiver whose bounds touch `sphere`.
    fn for_each_in_sphere(&self, sphere: &Sphere, visit: &mut dyn FnMut(&dyn ShadowReceiver));
}

impl<R: ShadowReceiver> PartitionQuery for [R] {
    fn for_each_in_sphere(&self, sphere: &Sphere, visit: &mut dyn FnMut(&dyn ShadowReceiver)) {
        for receiver in self {
            if receiver.world_bounds().intersects_sphere(sphere) {
                visit(receiver);
            }
        }
    }
}

impl<R: ShadowReceiver> PartitionQuery for Vec<R> {
    fn for_each_in_sphere(&self, sphere: &Sphere, visit: &mut dyn FnMut(&dyn ShadowReceiver)) {
        self.as_slice().for_each_in_sphere(sphere, visit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    struct Crate {
        id: u64,
        bounds: Aabb,
    }

    impl ShadowReceiver for Crate {
        fn object_id(&self) -> ObjectId {
            ObjectId(self.id)
        }

        fn world_bounds(&self) -> Aabb {
            self.bounds
        }
    }

    #[test]
    fn slice_query_visits_only_touching_receivers() {
        let scene = vec![
            Crate {
                id: 1,
                bounds: Aabb::from_center_extent(Vec3::ZERO, Vec3::ONE),
            },
            Crate {
                id: 2,
                bounds: Aabb::from_center_extent(Vec3::new(10.0, 0.0, 0.0), Vec3::ONE),
            },
        ];
        let mut hits = Vec::new();
        scene.for_each_in_sphere(&Sphere::new(Vec3::new(2.5, 0.0, 0.0), 2.0), &mut |r| {
            hits.push(r.object_id())
        });
        assert_eq!(hits, vec![ObjectId(1)]);
    }
}

// scene/mod.rs

pub mod bounds;
pub mod object;
pub mod terrain;

pub use bounds::{Aabb, Sphere};
pub use object::{PartitionQuery, ShadowCaster, ShadowReceiver};
pub use terrain::{DrawExtent, GridHeightField, HeightField};

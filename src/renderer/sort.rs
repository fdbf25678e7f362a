use glam::{Mat4, Vec3};

/// Arrays at or below this length are insertion sorted.
pub const INSERTION_SORT_THRESHOLD: usize = 16;

/// Sort key of one triangle in the overlap pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempIndex {
    /// Indices into the combined sorting vertex buffer.
    pub tri: [u16; 3],
    /// Position of the originating node in the overlap pool.
    pub node: u16,
    /// View-space depth; ascending order is back to front.
    pub z: f32,
}

/// True when the z row of `world_view` is `(0, 0, 1, 0)`, so view depth
/// equals source depth.
pub fn is_planar_z(world_view: &Mat4) -> bool {
    world_view.x_axis.z == 0.0
        && world_view.y_axis.z == 0.0
        && world_view.w_axis.z == 0.0
        && world_view.z_axis.z == 1.0
}

/// View-space depth of a triangle's centroid.
pub fn triangle_depth(world_view: &Mat4, a: Vec3, b: Vec3, c: Vec3) -> f32 {
    if is_planar_z(world_view) {
        (a.z + b.z + c.z) / 3.0
    } else {
        let mean = (a + b + c) / 3.0;
        world_view.row(2).dot(mean.extend(1.0))
    }
}

/// Reusable key array plus the hybrid sort over it.
#[derive(Debug, Default)]
pub struct TriangleSorter {
    keys: Vec<TempIndex>,
    non_finite: usize,
}

impl TriangleSorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: Vec::with_capacity(capacity),
            non_finite: 0,
        }
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.non_finite = 0;
    }

    pub fn reserve(&mut self, additional: usize) {
        self.keys.reserve(additional);
    }

    /// Queue one triangle. Non-finite depths are pinned to the far end so a
    /// degenerate transform cannot scramble the rest of the order.
    pub fn push(&mut self, tri: [u16; 3], node: u16, z: f32) {
        let z = if z.is_finite() {
            z
        } else {
            self.non_finite += 1;
            f32::MIN
        };
        self.keys.push(TempIndex { tri, node, z });
    }

    pub fn sort(&mut self) {
        sort(&mut self.keys);
    }

    pub fn keys(&self) -> &[TempIndex] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of keys pushed since the last clear whose depth was NaN or infinite.
    pub fn non_finite(&self) -> usize {
        self.non_finite
    }
}

/// Ascending depth sort: insertion sort for short arrays, median-of-three
/// quicksort otherwise. Not stable for equal depths.
pub fn sort(keys: &mut [TempIndex]) {
    quick_sort_with_cutoff(keys, INSERTION_SORT_THRESHOLD);
}

pub fn insertion_sort(keys: &mut [TempIndex]) {
    for i in 1..keys.len() {
        let key = keys[i];
        let mut j = i;
        while j > 0 && key.z < keys[j - 1].z {
            keys[j] = keys[j - 1];
            j -= 1;
        }
        keys[j] = key;
    }
}

/// Quicksort all the way down, bypassing the insertion cutoff.
pub fn quick_sort(keys: &mut [TempIndex]) {
    quick_sort_with_cutoff(keys, 2);
}

fn quick_sort_with_cutoff(keys: &mut [TempIndex], cutoff: usize) {
    debug_assert!(cutoff >= 2);
    let mut keys = keys;
    loop {
        let len = keys.len();
        if len <= cutoff {
            insertion_sort(keys);
            return;
        }

        let pivot_slot = partition(keys);
        let (left, rest) = keys.split_at_mut(pivot_slot);
        let right = &mut rest[1..];

        // Recurse into the smaller side, loop on the larger one.
        if left.len() < right.len() {
            quick_sort_with_cutoff(left, cutoff);
            keys = right;
        } else {
            quick_sort_with_cutoff(right, cutoff);
            keys = left;
        }
    }
}

/// Median-of-three partition of a slice with at least three elements.
///
/// After ordering the first, middle and last keys, the first and last act
/// as guards, so neither scan needs a bounds check. Returns the pivot's
/// final position.
fn partition(keys: &mut [TempIndex]) -> usize {
    let last = keys.len() - 1;
    let mid = last / 2;

    if keys[mid].z < keys[0].z {
        keys.swap(0, mid);
    }
    if keys[last].z < keys[0].z {
        keys.swap(0, last);
    }
    if keys[last].z < keys[mid].z {
        keys.swap(mid, last);
    }

    let pivot_slot = last - 1;
    keys.swap(mid, pivot_slot);
    let pivot = keys[pivot_slot].z;

    let mut i = 0;
    let mut j = pivot_slot;
    loop {
        i += 1;
        while keys[i].z < pivot {
            i += 1;
        }
        j -= 1;
        while pivot < keys[j].z {
            j -= 1;
        }
        if i >= j {
            break;
        }
        keys.swap(i, j);
    }
    keys.swap(i, pivot_slot);
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn keys_from(depths: &[f32]) -> Vec<TempIndex> {
        depths
            .iter()
            .enumerate()
            .map(|(i, &z)| TempIndex {
                tri: [i as u16, i as u16 + 1, i as u16 + 2],
                node: (i % 7) as u16,
                z,
            })
            .collect()
    }

    fn assert_sorted(keys: &[TempIndex]) {
        for pair in keys.windows(2) {
            assert!(pair[0].z <= pair[1].z, "{} > {}", pair[0].z, pair[1].z);
        }
    }

    fn signature(keys: &[TempIndex]) -> Vec<[u16; 3]> {
        let mut tris: Vec<_> = keys.iter().map(|k| k.tri).collect();
        tris.sort();
        tris
    }

    #[test]
    fn random_arrays_sort_as_permutations() {
        let mut rng = SmallRng::seed_from_u64(7);
        for len in [0usize, 1, 2, 3, 5, 16, 17, 64, 1000, 4097] {
            let depths: Vec<f32> = (0..len).map(|_| rng.gen_range(-500.0..500.0)).collect();
            let mut keys = keys_from(&depths);
            let before = signature(&keys);
            sort(&mut keys);
            assert_sorted(&keys);
            assert_eq!(signature(&keys), before, "len {len}");
        }
    }

    #[test]
    fn many_duplicates_still_sort() {
        let mut rng = SmallRng::seed_from_u64(11);
        let depths: Vec<f32> = (0..2000).map(|_| rng.gen_range(0..4) as f32).collect();
        let mut keys = keys_from(&depths);
        sort(&mut keys);
        assert_sorted(&keys);
    }

    #[test]
    fn descending_and_sorted_inputs() {
        let mut descending = keys_from(&(0..300).rev().map(|z| z as f32).collect::<Vec<_>>());
        sort(&mut descending);
        assert_sorted(&descending);

        let mut ascending = keys_from(&(0..300).map(|z| z as f32).collect::<Vec<_>>());
        sort(&mut ascending);
        assert_sorted(&ascending);
    }

    #[test]
    fn small_arrays_agree_between_paths() {
        let mut rng = SmallRng::seed_from_u64(3);
        for len in 0..=INSERTION_SORT_THRESHOLD {
            for _ in 0..50 {
                // Distinct depths so the comparison is tie free.
                let mut depths: Vec<f32> = (0..len).map(|i| i as f32 * 1.5).collect();
                for i in (1..len).rev() {
                    let j = rng.gen_range(0..=i);
                    depths.swap(i, j);
                }
                let mut by_insertion = keys_from(&depths);
                let mut by_quicksort = by_insertion.clone();
                insertion_sort(&mut by_insertion);
                quick_sort(&mut by_quicksort);
                assert_eq!(by_insertion, by_quicksort);
            }
        }
    }

    #[test]
    fn non_finite_depths_are_pinned_far() {
        let mut sorter = TriangleSorter::new();
        sorter.push([0, 1, 2], 0, 3.0);
        sorter.push([3, 4, 5], 1, f32::NAN);
        sorter.push([6, 7, 8], 2, -1.0);
        sorter.sort();
        assert_eq!(sorter.non_finite(), 1);
        assert_eq!(sorter.keys()[0].node, 1);
        assert_eq!(sorter.keys()[1].node, 2);
    }

    #[test]
    fn planar_and_general_depth_agree_for_billboards() {
        let a = Vec3::new(1.0, 2.0, -5.0);
        let b = Vec3::new(2.0, 2.0, -5.0);
        let c = Vec3::new(1.0, 3.0, -5.0);

        let planar = Mat4::from_translation(Vec3::new(4.0, -2.0, 0.0));
        assert!(is_planar_z(&planar));
        let cheap = triangle_depth(&planar, a, b, c);

        // Same transform, but with the z row forced through the general path.
        let mut general = planar;
        general.w_axis = Vec4::new(4.0, -2.0, 1e-30, 1.0);
        assert!(!is_planar_z(&general));
        let full = triangle_depth(&general, a, b, c);

        assert!((cheap - full).abs() < 1e-5);
        assert_eq!(cheap, -5.0);
    }

    #[test]
    fn general_depth_applies_view_transform() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let z = triangle_depth(&view, Vec3::ZERO, Vec3::X, Vec3::Y);
        // centroid (1/3, 1/3, 0) sits 10 units in front of the camera
        assert!((z + 10.0).abs() < 1e-5);
    }
}

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::renderer::buffers::{ScratchCapacity, MAX_INDICES_PER_BATCH, MAX_VERTICES_PER_BATCH};

/// Most triangles whose indices fit one 16-bit index buffer.
pub const MAX_POLYGONS_PER_BATCH: usize = MAX_INDICES_PER_BATCH / 3;

/// Per-renderer sizing for the sorting pool and the shadow/decal passes.
///
/// Every value is a hard ceiling for a frame; nothing here grows at runtime
/// except where noted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RenderSettings {
    #[serde(default)]
    pub sorting: SortingSettings,
    #[serde(default)]
    pub shadows: ShadowSettings,
}

impl RenderSettings {
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RenderSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded render settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default render settings.",
                        path, err
                    );
                    RenderSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    pub fn validate(self) -> Self {
        Self {
            sorting: self.sorting.validate(),
            shadows: self.shadows.validate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SortingSettings {
    #[serde(default = "SortingSettings::default_max_overlapping_nodes")]
    pub max_overlapping_nodes: usize,
    #[serde(default = "SortingSettings::default_max_overlapping_vertices")]
    pub max_overlapping_vertices: usize,
    #[serde(default = "SortingSettings::default_max_overlapping_polygons")]
    pub max_overlapping_polygons: usize,
    /// Lower bound for the combined sorting vertex buffer so the same GPU
    /// buffer is reused frame after frame.
    #[serde(default = "SortingSettings::default_sorting_vertex_count")]
    pub default_sorting_vertex_count: usize,
}

impl Default for SortingSettings {
    fn default() -> Self {
        Self {
            max_overlapping_nodes: Self::default_max_overlapping_nodes(),
            max_overlapping_vertices: Self::default_max_overlapping_vertices(),
            max_overlapping_polygons: Self::default_max_overlapping_polygons(),
            default_sorting_vertex_count: Self::default_sorting_vertex_count(),
        }
    }
}

impl SortingSettings {
    pub fn validate(mut self) -> Self {
        if self.max_overlapping_nodes == 0 || self.max_overlapping_nodes > u16::MAX as usize {
            warn!(
                "max_overlapping_nodes must be in 1..={}. Using default value.",
                u16::MAX
            );
            self.max_overlapping_nodes = Self::default_max_overlapping_nodes();
        }

        if self.max_overlapping_vertices == 0
            || self.max_overlapping_vertices > MAX_VERTICES_PER_BATCH
        {
            warn!(
                "max_overlapping_vertices must be in 1..={}. Using default value.",
                MAX_VERTICES_PER_BATCH
            );
            self.max_overlapping_vertices = Self::default_max_overlapping_vertices();
        }

        if self.max_overlapping_polygons == 0 {
            warn!("max_overlapping_polygons must be greater than zero. Using default value.");
            self.max_overlapping_polygons = Self::default_max_overlapping_polygons();
        } else if self.max_overlapping_polygons > MAX_POLYGONS_PER_BATCH {
            warn!(
                "max_overlapping_polygons exceeds {}. Clamping.",
                MAX_POLYGONS_PER_BATCH
            );
            self.max_overlapping_polygons = MAX_POLYGONS_PER_BATCH;
        }

        if self.default_sorting_vertex_count > self.max_overlapping_vertices {
            warn!("default_sorting_vertex_count exceeds max_overlapping_vertices. Clamping.");
            self.default_sorting_vertex_count = self.max_overlapping_vertices;
        }

        self
    }

    /// Initial size of the sorting scratch arrays.
    pub fn scratch_capacity(&self) -> ScratchCapacity {
        ScratchCapacity::new(
            self.default_sorting_vertex_count,
            (self.default_sorting_vertex_count * 3).min(MAX_INDICES_PER_BATCH),
        )
    }

    const fn default_max_overlapping_nodes() -> usize {
        4096
    }

    const fn default_max_overlapping_vertices() -> usize {
        MAX_VERTICES_PER_BATCH
    }

    const fn default_max_overlapping_polygons() -> usize {
        MAX_POLYGONS_PER_BATCH
    }

    const fn default_sorting_vertex_count() -> usize {
        4000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowSettings {
    #[serde(default = "ShadowSettings::default_shadow_texture_size")]
    pub shadow_texture_size: u32,
    /// Widest decal cell range along either axis.
    #[serde(default = "ShadowSettings::default_max_decal_cells")]
    pub max_decal_cells: u32,
    #[serde(default = "ShadowSettings::default_scratch_vertices")]
    pub terrain_shadow_vertices: usize,
    #[serde(default = "ShadowSettings::default_scratch_indices")]
    pub terrain_shadow_indices: usize,
    #[serde(default = "ShadowSettings::default_scratch_vertices")]
    pub decal_vertices: usize,
    #[serde(default = "ShadowSettings::default_scratch_indices")]
    pub decal_indices: usize,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            shadow_texture_size: Self::default_shadow_texture_size(),
            max_decal_cells: Self::default_max_decal_cells(),
            terrain_shadow_vertices: Self::default_scratch_vertices(),
            terrain_shadow_indices: Self::default_scratch_indices(),
            decal_vertices: Self::default_scratch_vertices(),
            decal_indices: Self::default_scratch_indices(),
        }
    }
}

impl ShadowSettings {
    pub fn validate(mut self) -> Self {
        if self.shadow_texture_size == 0 || !self.shadow_texture_size.is_power_of_two() {
            warn!("Shadow texture size must be a power of two. Using default value.");
            self.shadow_texture_size = Self::default_shadow_texture_size();
        }

        if self.max_decal_cells == 0 {
            warn!("max_decal_cells must be greater than zero. Using default value.");
            self.max_decal_cells = Self::default_max_decal_cells();
        }

        for (label, vertices) in [
            ("terrain_shadow_vertices", &mut self.terrain_shadow_vertices),
            ("decal_vertices", &mut self.decal_vertices),
        ] {
            if *vertices < 4 || *vertices > MAX_VERTICES_PER_BATCH {
                warn!(
                    "{} must be in 4..={}. Using default value.",
                    label, MAX_VERTICES_PER_BATCH
                );
                *vertices = Self::default_scratch_vertices();
            }
        }

        for (label, indices) in [
            ("terrain_shadow_indices", &mut self.terrain_shadow_indices),
            ("decal_indices", &mut self.decal_indices),
        ] {
            if *indices < 6 {
                warn!("{} must be at least 6. Using default value.", label);
                *indices = Self::default_scratch_indices();
            } else if *indices > MAX_INDICES_PER_BATCH {
                warn!("{} exceeds {}. Clamping.", label, MAX_INDICES_PER_BATCH);
                *indices = MAX_INDICES_PER_BATCH;
            }
        }

        self
    }

    pub fn terrain_shadow_scratch(&self) -> ScratchCapacity {
        ScratchCapacity::new(self.terrain_shadow_vertices, self.terrain_shadow_indices)
    }

    pub fn decal_scratch(&self) -> ScratchCapacity {
        ScratchCapacity::new(self.decal_vertices, self.decal_indices)
    }

    const fn default_shadow_texture_size() -> u32 {
        512
    }

    const fn default_max_decal_cells() -> u32 {
        104
    }

    /// Room for one decal of the widest cell range.
    const fn default_scratch_vertices() -> usize {
        16384
    }

    /// Whole cells of six indices under the 16-bit limit.
    const fn default_scratch_indices() -> usize {
        MAX_INDICES_PER_BATCH / 6 * 6
    }
}

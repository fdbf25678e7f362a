use std::rc::Rc;

use glam::Mat4;

use crate::renderer::device::{BufferId, LightSetId, MaterialId, TextureHandle};
use crate::renderer::draw::{BlendMode, VertexFormat};
use crate::renderer::Vertex;

pub const MAX_TEXTURE_STAGES: usize = 2;

/// Storage class of a vertex or index stream.
///
/// Sorting classes live in system memory so the sorting pool can read their
/// triangles back; the other classes are plain GPU buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferClass {
    Static,
    Dynamic,
    Sorting,
    DynamicSorting,
}

impl BufferClass {
    pub fn is_sorting(self) -> bool {
        matches!(self, Self::Sorting | Self::DynamicSorting)
    }
}

#[derive(Debug, Clone)]
pub enum VertexStream {
    Device { buffer: BufferId, dynamic: bool },
    Sorting { vertices: Rc<[Vertex]>, dynamic: bool },
}

impl VertexStream {
    pub fn class(&self) -> BufferClass {
        match self {
            Self::Device { dynamic: false, .. } => BufferClass::Static,
            Self::Device { dynamic: true, .. } => BufferClass::Dynamic,
            Self::Sorting { dynamic: false, .. } => BufferClass::Sorting,
            Self::Sorting { dynamic: true, .. } => BufferClass::DynamicSorting,
        }
    }
}

#[derive(Debug, Clone)]
pub enum IndexStream {
    Device { buffer: BufferId, dynamic: bool },
    Sorting { indices: Rc<[u16]>, dynamic: bool },
}

impl IndexStream {
    pub fn class(&self) -> BufferClass {
        match self {
            Self::Device { dynamic: false, .. } => BufferClass::Static,
            Self::Device { dynamic: true, .. } => BufferClass::Dynamic,
            Self::Sorting { dynamic: false, .. } => BufferClass::Sorting,
            Self::Sorting { dynamic: true, .. } => BufferClass::DynamicSorting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderState {
    pub blend: BlendMode,
    pub depth_write: bool,
    pub two_sided: bool,
}

impl ShaderState {
    pub const OPAQUE: Self = Self {
        blend: BlendMode::Opaque,
        depth_write: true,
        two_sided: false,
    };

    pub const fn translucent(blend: BlendMode) -> Self {
        Self {
            blend,
            depth_write: false,
            two_sided: false,
        }
    }
}

impl Default for ShaderState {
    fn default() -> Self {
        Self::OPAQUE
    }
}

/// Everything a draw needs except the geometry streams.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawState {
    pub shader: ShaderState,
    pub format: VertexFormat,
    pub material: MaterialId,
    pub textures: [Option<TextureHandle>; MAX_TEXTURE_STAGES],
    pub world: Mat4,
    pub view: Mat4,
    pub lights: LightSetId,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            shader: ShaderState::OPAQUE,
            format: VertexFormat::DIFFUSE,
            material: MaterialId(0),
            textures: [None; MAX_TEXTURE_STAGES],
            world: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            lights: LightSetId::NONE,
        }
    }
}

impl DrawState {
    pub fn texture_count(&self) -> u8 {
        self.textures.iter().filter(|t| t.is_some()).count() as u8
    }

    pub fn world_view(&self) -> Mat4 {
        self.view * self.world
    }
}

/// Render state captured with a submitted triangle range.
///
/// Holding the state keeps its sorting streams alive; dropping it releases
/// them.
#[derive(Debug, Clone)]
pub struct RenderState {
    pub draw: DrawState,
    pub vertices: VertexStream,
    pub indices: IndexStream,
    /// Added to every vertex index before it addresses `vertices`.
    pub vertex_offset: u32,
    /// Added to the node's start index before it addresses `indices`.
    pub index_offset: u32,
}

impl RenderState {
    pub fn is_sorting(&self) -> bool {
        self.vertices.class().is_sorting() && self.indices.class().is_sorting()
    }

    /// Sorting streams mixed with device streams cannot be drawn by either path.
    pub fn is_mixed(&self) -> bool {
        self.vertices.class().is_sorting() != self.indices.class().is_sorting()
    }
}

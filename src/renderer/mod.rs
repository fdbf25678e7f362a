pub mod batches;
pub mod buffers;
pub mod device;
pub mod draw;
pub mod error;
pub mod headless;
pub mod sort;
pub mod state;
pub mod vertex;

pub use batches::{FlushStats, SortingNode, SortingPool, SubmitStatus};
pub use buffers::{ScratchBufferPool, ScratchCapacity, ScratchKind, UploadedBatch};
pub use device::{
    BufferId, BufferUsage, GraphicsDevice, IndexedDraw, LightSetId, MapMode, MaterialId,
    ObjectId, TextureHandle,
};
pub use draw::{BlendMode, DrawDescription, VertexFormat};
pub use error::RenderError;
pub use headless::HeadlessDevice;
pub use sort::TriangleSorter;
pub use state::{BufferClass, DrawState, IndexStream, RenderState, ShaderState, VertexStream};
pub use vertex::{pack_argb, Vertex};

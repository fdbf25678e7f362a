use thiserror::Error;

use crate::renderer::device::{BufferId, TextureHandle};

/// Failures reported by a [`GraphicsDevice`](crate::renderer::GraphicsDevice).
///
/// Core operations never let these escape as panics; they either propagate
/// them with `?` or fold them into a status result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureHandle),
    #[error("buffer overflow: {requested} elements requested, capacity {capacity}")]
    BufferOverflow { requested: usize, capacity: usize },
    #[error("index {index} outside vertex range {min}..{end}")]
    IndexOutOfRange { index: u32, min: u32, end: u32 },
    #[error("draw issued with no buffers bound")]
    NoBuffersBound,
    #[error("device lost")]
    DeviceLost,
    #[error("invalid texture extent {width}x{height}")]
    InvalidExtent { width: u32, height: u32 },
}

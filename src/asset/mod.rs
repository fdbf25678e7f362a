pub mod arena;
pub mod handle;

pub use arena::Arena;
pub use handle::Handle;

use crate::renderer::TextureHandle;

/// Sampling constraints a caller needs from a loaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureOptions {
    pub clamp: bool,
    pub mipmaps: bool,
}

impl TextureOptions {
    /// Clamped and unmipped, as shadow and decal images are sampled.
    pub const DECAL: Self = Self {
        clamp: true,
        mipmaps: false,
    };
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            clamp: false,
            mipmaps: true,
        }
    }
}

/// Resolves image names to loaded textures.
pub trait TextureProvider {
    /// `None` when the image does not exist or failed to load.
    fn load(&mut self, name: &str, options: TextureOptions) -> Option<TextureHandle>;

    fn size(&self, _texture: TextureHandle) -> Option<(u32, u32)> {
        None
    }
}

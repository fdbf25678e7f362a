pub mod asset;
pub mod renderer;
pub mod scene;
pub mod settings;
pub mod shadow;

pub use renderer::{
    FlushStats, GraphicsDevice, HeadlessDevice, RenderError, ScratchBufferPool, SortingNode,
    SortingPool, SubmitStatus, TriangleSorter, Vertex,
};
pub use settings::{RenderSettings, ShadowSettings, SortingSettings};
pub use shadow::{ShadowManager, ShadowRegistry, ShadowStats};

/// Install `env_logger` at info level. Later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

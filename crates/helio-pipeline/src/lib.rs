//! Helio Pipeline - configurable stage graph with per-object effect dispatch
//!
//! The pipeline is split into a handful of cooperating parts:
//!
//! - [`graph`] orders render stages from their declared pipe dependencies and
//!   reallocates their targets on resize
//! - [`effects`] turns declarative effect descriptions into cached, per-pass
//!   shader programs
//! - [`tags`] binds compiled effects to scene nodes with sort-based overrides
//! - [`scheduler`] holds the per-frame run state, resize snapping and the task queue
//! - [`RenderPipeline`] owns all of the above and drives startup, ticking and reload
//!
//! GPU work goes through the [`backend::RenderBackend`] trait, so the whole
//! pipeline can run on top of `wgpu` or headless.

pub mod backend;
pub mod config;
pub mod effects;
pub mod graph;
pub mod materials;
pub mod plugins;
pub mod probes;
pub mod scene;
pub mod scheduler;
pub mod stages;
pub mod tags;
pub mod watcher;

mod context;
mod pipeline;

pub use config::PipelineSettings;
pub use context::{scaled_resolution, snap_to_multiple_of_4, PipelineContext};
pub use pipeline::{
    EffectBinding, FrameManager, RenderPipeline, DEFAULT_EFFECT_SORT, SKYBOX_EFFECT_SORT,
};
pub use scene::{NodeId, SceneTree};

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or running the pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Missing GPU capability: {0}")]
    MissingCapability(String),

    #[error("Pipe '{pipe}' is missing for stage '{stage}'")]
    UnsatisfiedPipe { stage: String, pipe: String },

    #[error("Pipe '{pipe}' is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        pipe: String,
        first: String,
        second: String,
    },

    #[error("Input '{input}' is missing for stage '{stage}'")]
    MissingInput { stage: String, input: String },

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Effect error: {0}")]
    Effect(String),

    #[error("Shader error: {0}")]
    Shader(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Material error: {0}")]
    Material(String),

    #[error("Unknown scene node {0}")]
    UnknownNode(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WGPU error: {0}")]
    Wgpu(String),
}

impl From<wgpu::Error> for Error {
    fn from(err: wgpu::Error) -> Self {
        Error::Wgpu(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Whether this error must abort pipeline startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MissingCapability(_)
                | Error::UnsatisfiedPipe { .. }
                | Error::DuplicateProducer { .. }
                | Error::MissingInput { .. }
                | Error::Graph(_)
                | Error::Backend(_)
        )
    }
}

//! The seam to the third-party renderer subprocess.

use async_trait::async_trait;
use renderhive_types::app::{RenderDevice, RenderEngine};
use renderhive_types::error::RendererError;
use std::path::PathBuf;

/// Everything needed to spawn one render run.
#[derive(Debug, Clone)]
pub struct RenderInvocation {
    pub executable: PathBuf,
    pub scene: PathBuf,
    pub engine: RenderEngine,
    pub device: RenderDevice,
    pub frame_start: i64,
    pub frame_end: i64,
    pub frame_step: u32,
    /// Directory the renderer writes frames into.
    pub output_dir: PathBuf,
    pub threads: u32,
}

/// A successful render run.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    /// The frames found under the output directory, sorted.
    pub output_files: Vec<PathBuf>,
}

/// Drives the renderer: spawn, consume stdout/stderr, await exit.
///
/// Failures are never retried automatically; resource usage of a failed run
/// is not assumed to be deterministic.
#[async_trait]
pub trait RendererDriver: Send + Sync {
    async fn render(&self, invocation: RenderInvocation) -> Result<RenderOutcome, RendererError>;
}

//! Renderer subsystem error handling
//!
//! Helpers that turn backend errors (wgpu, surface, I/O) into classified
//! [`EngineError`]s without sprinkling `map_err` closures over the frame code.

use crate::error::{EngineError, EngineResult, FrameStage, InitStage};

/// Type alias for renderer operation results
pub type RendererResult<T> = EngineResult<T>;

/// Helper trait for renderer error contexts
pub trait RendererErrorContext<T> {
    /// Attach a start-up stage to the error
    fn init_context(self, stage: InitStage) -> RendererResult<T>;

    /// Attach a frame stage and frame index to the error
    fn frame_context(self, stage: FrameStage, frame: u64) -> RendererResult<T>;
}

impl<T, E> RendererErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn init_context(self, stage: InitStage) -> RendererResult<T> {
        self.map_err(|e| EngineError::init(stage, e))
    }

    fn frame_context(self, stage: FrameStage, frame: u64) -> RendererResult<T> {
        self.map_err(|e| EngineError::frame(stage, frame, e))
    }
}

/// Create a pipeline creation error
pub fn pipeline_creation_error(pipeline: &str, error: impl std::fmt::Display) -> EngineError {
    EngineError::init(
        InitStage::Display,
        format!("failed to create pipeline '{}': {}", pipeline, error),
    )
}

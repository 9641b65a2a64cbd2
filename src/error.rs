//! Engine-wide error type
//!
//! Every fallible operation in the crate returns [`EngineResult`]. Errors are
//! grouped into classes that decide how far they propagate: initialization,
//! resource and build failures stop the renderer, frame failures only skip
//! the current frame.

use std::fmt;
use std::path::PathBuf;

/// Result alias used throughout the engine
pub type EngineResult<T> = Result<T, EngineError>;

/// Step of start-up that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitStage {
    Platform,
    Surface,
    Adapter,
    Device,
    SurfaceConfig,
    SourceLoad,
    Program,
    KernelEntryPoint,
    StaticBind,
    Display,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitStage::Platform => "platform",
            InitStage::Surface => "display surface",
            InitStage::Adapter => "device selection",
            InitStage::Device => "context/queue creation",
            InitStage::SurfaceConfig => "surface configuration",
            InitStage::SourceLoad => "program source loading",
            InitStage::Program => "program creation",
            InitStage::KernelEntryPoint => "kernel entry point lookup",
            InitStage::StaticBind => "static argument binding",
            InitStage::Display => "display pipeline creation",
        };
        f.write_str(name)
    }
}

/// Step of the per-frame protocol that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStage {
    Binding,
    Acquiring,
    Dispatching,
    Waiting,
    Releasing,
    Presenting,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStage::Binding => "binding dynamic arguments",
            FrameStage::Acquiring => "acquiring the shared surface",
            FrameStage::Dispatching => "dispatching the kernel",
            FrameStage::Waiting => "waiting for kernel completion",
            FrameStage::Releasing => "releasing the shared surface",
            FrameStage::Presenting => "presenting",
        };
        f.write_str(name)
    }
}

/// How an error is handled by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The renderer cannot start
    FatalInit,
    /// A buffer could not be created at the current resolution
    FatalResource,
    /// One frame is lost, the loop continues
    TransientFrame,
    /// The compute program did not compile
    BuildDiagnostic,
    /// Invalid configuration or scene input
    Config,
    /// Too many frames failed back to back
    FrameStreak,
}

impl ErrorClass {
    /// Process exit status for this class
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::FatalInit => 2,
            ErrorClass::FatalResource => 3,
            ErrorClass::BuildDiagnostic => 4,
            ErrorClass::Config => 5,
            ErrorClass::FrameStreak => 6,
            // Never terminates the process on its own
            ErrorClass::TransientFrame => 1,
        }
    }

    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorClass::TransientFrame)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("initialization failed during {stage}: {error}")]
    Init { stage: InitStage, error: String },

    #[error("failed to create {buffer} buffer: {error}")]
    Resource { buffer: String, error: String },

    #[error("frame {frame} failed while {stage}: {error}")]
    Frame {
        stage: FrameStage,
        frame: u64,
        error: String,
    },

    #[error("compute program failed to build:\n{log}")]
    Build { log: String },

    #[error("scene holds {count} primitives but the primitive buffer capacity is {capacity}")]
    SceneCapacity { count: usize, capacity: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{count} consecutive frames failed, last error: {last}")]
    FrameStreak { count: u32, last: Box<EngineError> },
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Init { .. } | EngineError::Io { .. } => ErrorClass::FatalInit,
            EngineError::Resource { .. } | EngineError::SceneCapacity { .. } => {
                ErrorClass::FatalResource
            }
            EngineError::Frame { .. } => ErrorClass::TransientFrame,
            EngineError::Build { .. } => ErrorClass::BuildDiagnostic,
            EngineError::Config(_) => ErrorClass::Config,
            EngineError::FrameStreak { .. } => ErrorClass::FrameStreak,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }

    pub fn init(stage: InitStage, error: impl fmt::Display) -> Self {
        EngineError::Init {
            stage,
            error: error.to_string(),
        }
    }

    pub fn resource(buffer: impl Into<String>, error: impl fmt::Display) -> Self {
        EngineError::Resource {
            buffer: buffer.into(),
            error: error.to_string(),
        }
    }

    pub fn frame(stage: FrameStage, frame: u64, error: impl fmt::Display) -> Self {
        EngineError::Frame {
            stage,
            frame,
            error: error.to_string(),
        }
    }

    /// Stage of a frame error, if this is one
    pub fn frame_stage(&self) -> Option<FrameStage> {
        match self {
            EngineError::Frame { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

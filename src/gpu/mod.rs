//! GPU resource management
//!
//! Device/context/queue lifecycle, program build, buffer creation and the
//! ownership protocol of the buffer shared between compute and display.

pub mod buffer_manager;
pub mod context;
pub mod handle;
pub mod preprocessor;
pub mod program;
pub mod shared_surface;

pub use buffer_manager::{
    AccumPixel, BufferLayout, InteropBuffers, ScalarArgBuffers, SharedOutput, WrapState,
};
pub use context::{ComputeContext, ContextOptions, ContextState, PowerMode};
pub use handle::{Releasable, Slot};
pub use preprocessor::SourceLoader;
pub use program::{
    workgroup_count, ComputeProgram, EntryPointInfo, Kernel, KernelSet, SourceUnit, ValidatedSource,
    DEFAULT_KERNEL_NAME,
};
pub use shared_surface::{Ownership, SharedSurface};

/// Run `op` inside validation and out-of-memory error scopes.
///
/// wgpu reports most creation errors asynchronously; this turns them back
/// into a plain `Result` for the calling operation.
pub(crate) fn capture_errors<T>(device: &wgpu::Device, op: impl FnOnce() -> T) -> Result<T, wgpu::Error> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = op();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    match validation.or(out_of_memory) {
        Some(error) => Err(error),
        None => Ok(value),
    }
}

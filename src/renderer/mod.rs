pub mod binder;
pub mod error;
pub mod frame_driver;
pub mod gpu_recovery;
mod gpu_state;
pub mod present;
pub mod teardown;

use crate::config::EngineConfig;
use crate::error::EngineResult;
use winit::event_loop::EventLoop;

pub use binder::{
    ArgSlot, ArgumentSink, BufferRole, DynamicArgs, KernelArg, KernelArgumentBinder, SeedSequence,
    StaticArgs,
};
pub use error::{RendererErrorContext, RendererResult};
pub use frame_driver::{
    DriverOptions, FrameBackend, FrameDriver, FrameReport, FrameState, FrameStats,
};
pub use gpu_recovery::{AdapterStrategy, FrameHealthMonitor, GpuRecovery};
pub use gpu_state::GpuState;
pub use present::DisplayPipeline;
pub use teardown::{ReleaseStage, TeardownReport, TeardownSequence};

pub fn run(event_loop: EventLoop<()>, config: EngineConfig) -> EngineResult<()> {
    log::info!("[renderer::run] Starting renderer initialization");
    log::debug!("[renderer::run] Config: {:?}", config);

    let result = pollster::block_on(gpu_state::run_app(event_loop, config));

    match &result {
        Ok(_) => log::info!("[renderer::run] gpu_state::run_app completed successfully"),
        Err(e) => log::error!("[renderer::run] gpu_state::run_app failed: {}", e),
    }

    result
}

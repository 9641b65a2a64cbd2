pub mod config;
pub mod error;
pub mod gpu;
pub mod renderer;
pub mod scene;

use winit::event_loop::EventLoop;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorClass, FrameStage, InitStage};
pub use renderer::{FrameDriver, GpuState};
pub use scene::{build_scene, SceneKind, SceneSnapshot};

/// Owns the event loop and runs the renderer until the window closes
pub struct Engine {
    config: EngineConfig,
    event_loop: Option<EventLoop<()>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        // Force X11 backend for WSL compatibility
        #[cfg(target_os = "linux")]
        let event_loop = {
            use renderer::RendererErrorContext;
            use winit::event_loop::EventLoopBuilder;
            use winit::platform::x11::EventLoopBuilderExtX11;
            EventLoopBuilder::new()
                .with_x11()
                .build()
                .init_context(InitStage::Platform)?
        };

        #[cfg(not(target_os = "linux"))]
        let event_loop = {
            use renderer::RendererErrorContext;
            EventLoop::new().init_context(InitStage::Platform)?
        };

        Ok(Self {
            config,
            event_loop: Some(event_loop),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(mut self) -> EngineResult<()> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or_else(|| EngineError::init(InitStage::Platform, "event loop already taken"))?;
        renderer::run(event_loop, self.config.clone())
    }
}

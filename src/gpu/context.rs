//! Compute context: instance, adapter, device, queue and program
//!
//! A [`ComputeContext`] is either fully initialized (`Ready`) or holds nothing
//! at all. Every step of [`ComputeContext::initialize`] stores its object in
//! a [`Slot`], so an early return drops the partially built context and the
//! [`Drop`] impl releases whatever was created, in order.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use winit::window::Window;

use crate::error::{EngineError, EngineResult, InitStage};
use crate::gpu::handle::{Releasable, Slot};
use crate::gpu::program::{ComputeProgram, Kernel, KernelSet, SourceUnit};
use crate::renderer::gpu_recovery::GpuRecovery;
use crate::renderer::teardown::{ReleaseStage, TeardownReport, TeardownSequence};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    NotReady,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerMode {
    #[default]
    HighPerformance,
    LowPower,
}

impl PowerMode {
    pub fn to_wgpu(self) -> wgpu::PowerPreference {
        match self {
            PowerMode::HighPerformance => wgpu::PowerPreference::HighPerformance,
            PowerMode::LowPower => wgpu::PowerPreference::LowPower,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub power: PowerMode,
    pub vsync: bool,
    pub backends: wgpu::Backends,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            power: PowerMode::HighPerformance,
            vsync: true,
            backends: wgpu::Backends::all(),
        }
    }
}

pub struct ComputeContext {
    state: ContextState,
    instance: Slot<wgpu::Instance>,
    adapter: Slot<wgpu::Adapter>,
    device: Slot<wgpu::Device>,
    queue: Slot<wgpu::Queue>,
    surface: Slot<wgpu::Surface<'static>>,
    surface_config: Option<wgpu::SurfaceConfiguration>,
    program: Slot<ComputeProgram>,
    kernels: Slot<KernelSet>,
}

impl ComputeContext {
    fn not_ready() -> Self {
        Self {
            state: ContextState::NotReady,
            instance: Slot::empty("instance"),
            adapter: Slot::empty("adapter"),
            device: Slot::empty("device"),
            queue: Slot::empty("queue"),
            surface: Slot::empty("surface"),
            surface_config: None,
            program: Slot::empty("program"),
            kernels: Slot::empty("kernels"),
        }
    }

    /// Create a context whose device can present to `window`
    pub async fn initialize(window: Arc<Window>, options: &ContextOptions) -> EngineResult<Self> {
        Self::init(Some(window), options).await
    }

    /// Create a context without a display surface
    pub async fn initialize_headless(options: &ContextOptions) -> EngineResult<Self> {
        Self::init(None, options).await
    }

    async fn init(window: Option<Arc<Window>>, options: &ContextOptions) -> EngineResult<Self> {
        log::info!("[ComputeContext::initialize] Starting GPU initialization");
        let init_start = Instant::now();
        let mut ctx = Self::not_ready();

        log::info!("[ComputeContext::initialize] Creating WGPU instance with backends {:?}", options.backends);
        let instance = ctx.instance.fill(wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: options.backends,
            ..Default::default()
        }))?;

        if let Some(window) = window.as_ref() {
            log::info!("[ComputeContext::initialize] Creating surface...");
            let surface = instance.create_surface(window.clone()).map_err(|e| {
                log::error!("[ComputeContext::initialize] Failed to create surface: {}", e);
                EngineError::init(InitStage::Surface, e)
            })?;
            ctx.surface.fill(surface)?;
        }

        log::info!("[ComputeContext::initialize] Requesting GPU adapter ({:?})...", options.power);
        let adapter = GpuRecovery::select_adapter(instance, ctx.surface.get(), options.power)
            .await
            .ok_or_else(|| EngineError::init(InitStage::Adapter, "no suitable GPU adapter found"))?;

        let info = adapter.get_info();
        log::info!("[ComputeContext::initialize] Adapter: {} ({:?})", info.name, info.device_type);
        log::info!("[ComputeContext::initialize] Backend: {:?}", info.backend);
        log::info!("[ComputeContext::initialize] Vendor: 0x{:04x}, Device: 0x{:04x}", info.vendor, info.device);
        if GpuRecovery::is_software_adapter(&info) {
            log::warn!("[ComputeContext::initialize] Software adapter selected, expect low frame rates");
        }

        let adapter_limits = adapter.limits();
        log::info!("[ComputeContext::initialize] Adapter limits:");
        log::info!("[ComputeContext::initialize]   max_buffer_size: {} MB", adapter_limits.max_buffer_size / 1024 / 1024);
        log::info!(
            "[ComputeContext::initialize]   max_storage_buffer_binding_size: {} MB",
            adapter_limits.max_storage_buffer_binding_size / 1024 / 1024
        );
        log::info!(
            "[ComputeContext::initialize]   max_compute_workgroup_size: {} x {} x {}",
            adapter_limits.max_compute_workgroup_size_x,
            adapter_limits.max_compute_workgroup_size_y,
            adapter_limits.max_compute_workgroup_size_z
        );

        let required_limits = wgpu::Limits {
            max_buffer_size: adapter_limits.max_buffer_size,
            max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
            ..wgpu::Limits::default().using_resolution(adapter_limits.clone())
        };

        log::info!("[ComputeContext::initialize] Requesting GPU device...");
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Raytrace Engine Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                },
                None,
            )
            .await
            .map_err(|e| {
                log::error!("[ComputeContext::initialize] Failed to create GPU device: {}", e);
                EngineError::init(InitStage::Device, e)
            })?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("[GPU] Uncaptured device error: {}", error);
        }));

        ctx.adapter.fill(adapter)?;
        ctx.device.fill(device)?;
        ctx.queue.fill(queue)?;

        if let Some(window) = window.as_ref() {
            let size = window.inner_size();
            ctx.configure_surface(size.width, size.height, options.vsync)?;
        }

        ctx.state = ContextState::Ready;
        log::info!(
            "[ComputeContext::initialize] GPU initialization complete in {:?}",
            init_start.elapsed()
        );
        Ok(ctx)
    }

    fn configure_surface(&mut self, width: u32, height: u32, vsync: bool) -> EngineResult<()> {
        let surface = self.surface.require()?;
        let adapter = self.adapter.require()?;
        let device = self.device.require()?;

        let caps = surface.get_capabilities(adapter);
        if caps.formats.is_empty() {
            return Err(EngineError::init(InitStage::SurfaceConfig, "no surface formats supported"));
        }
        log::info!("[ComputeContext::configure_surface] Available surface formats: {:?}", caps.formats);
        log::info!("[ComputeContext::configure_surface] Available present modes: {:?}", caps.present_modes);

        // Kernel output is already display-encoded, so prefer a linear format
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .unwrap_or_else(|| {
                log::warn!(
                    "[ComputeContext::configure_surface] No linear format found, using {:?}",
                    caps.formats[0]
                );
                caps.formats[0]
            });

        let wanted = if vsync {
            wgpu::PresentMode::Fifo
        } else {
            wgpu::PresentMode::Immediate
        };
        let present_mode = if caps.present_modes.contains(&wanted) {
            wanted
        } else {
            log::warn!(
                "[ComputeContext::configure_surface] {:?} not available, using AutoVsync",
                wanted
            );
            wgpu::PresentMode::AutoVsync
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode,
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        log::info!(
            "[ComputeContext::configure_surface] Configuring {:?} surface with size {}x{}",
            format,
            config.width,
            config.height
        );
        crate::gpu::capture_errors(device, || surface.configure(device, &config))
            .map_err(|e| EngineError::init(InitStage::SurfaceConfig, e))?;
        self.surface_config = Some(config);
        Ok(())
    }

    /// Compile `units` into the program. A failed build keeps the current
    /// program; a successful one invalidates the kernels of the old program.
    pub fn build_program(&mut self, units: &[SourceUnit]) -> EngineResult<&ComputeProgram> {
        let device = self.device.require()?;
        let replaced = !self.program.is_empty();

        if let Err(err) = self.program.replace_with(|_| ComputeProgram::build(device, units)) {
            if let EngineError::Build { log: build_log } = &err {
                log::error!("[ComputeContext::build_program] Program build failed:\n{}", build_log);
            }
            if replaced {
                log::warn!("[ComputeContext::build_program] Keeping previously built program");
            }
            return Err(err);
        }

        if replaced {
            self.kernels.release();
        }
        self.program.require()
    }

    /// Turn every entry point of the program into a kernel; `required` must be one of them
    pub fn extract_kernels(&mut self, required: &str) -> EngineResult<&KernelSet> {
        let device = self.device.require()?;
        let program = self.program.require()?;
        program.source().require_entry_point(required)?;

        let kernels = KernelSet::extract(device, program)?;
        kernels.require(required)?;

        let names: Vec<&str> = kernels.names().collect();
        log::info!("[ComputeContext::extract_kernels] Kernels: {:?}", names);

        self.kernels.release();
        self.kernels.fill(kernels)
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ContextState::Ready
    }

    pub fn device(&self) -> EngineResult<&wgpu::Device> {
        self.device.require()
    }

    pub fn queue(&self) -> EngineResult<&wgpu::Queue> {
        self.queue.require()
    }

    pub fn adapter_info(&self) -> Option<wgpu::AdapterInfo> {
        self.adapter.get().map(|a| a.get_info())
    }

    pub fn surface(&self) -> Option<&wgpu::Surface<'static>> {
        self.surface.get()
    }

    pub fn surface_config(&self) -> Option<&wgpu::SurfaceConfiguration> {
        self.surface_config.as_ref()
    }

    /// Configure the surface again after it was lost or outdated
    pub fn reconfigure_surface(&self) -> EngineResult<()> {
        if let (Some(surface), Some(config)) = (self.surface.get(), self.surface_config.as_ref()) {
            log::warn!(
                "[ComputeContext::reconfigure_surface] Reconfiguring surface at {}x{}",
                config.width,
                config.height
            );
            surface.configure(self.device.require()?, config);
        }
        Ok(())
    }

    pub fn program(&self) -> Option<&ComputeProgram> {
        self.program.get()
    }

    pub fn kernel(&self, name: &str) -> EngineResult<&Kernel> {
        self.kernels.require()?.require(name)
    }

    /// Register every handle with `sequence` under its release stage
    pub fn register_teardown<'a>(&'a mut self, sequence: &mut TeardownSequence<'a>) {
        self.state = ContextState::NotReady;
        self.surface_config = None;
        sequence
            .push(ReleaseStage::Display, &mut self.surface)
            .push(ReleaseStage::Kernels, &mut self.kernels)
            .push(ReleaseStage::Program, &mut self.program)
            .push(ReleaseStage::Queue, &mut self.queue)
            .push(ReleaseStage::Context, &mut self.device)
            .push(ReleaseStage::Device, &mut self.adapter)
            .push(ReleaseStage::Platform, &mut self.instance);
    }

    /// Release everything this context holds. Safe to call repeatedly.
    pub fn teardown(&mut self) -> TeardownReport {
        let mut sequence = TeardownSequence::new();
        self.register_teardown(&mut sequence);
        sequence.run()
    }

    pub fn is_released(&self) -> bool {
        self.instance.is_empty()
            && self.adapter.is_empty()
            && self.device.is_empty()
            && self.queue.is_empty()
            && self.surface.is_empty()
            && self.program.is_empty()
            && self.kernels.is_empty()
    }
}

impl Drop for ComputeContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

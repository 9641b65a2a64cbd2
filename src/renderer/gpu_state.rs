use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowBuilder};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, FrameStage, InitStage};
use crate::gpu::{
    capture_errors, BufferLayout, ComputeContext, InteropBuffers, Releasable, ScalarArgBuffers, Slot,
    SourceLoader, SourceUnit,
};
use crate::renderer::binder::{ArgSlot, ArgumentSink, BufferRole, KernelArg, KernelArgumentBinder, SeedSequence};
use crate::renderer::error::RendererErrorContext;
use crate::renderer::frame_driver::{FrameBackend, FrameDriver, FrameStats};
use crate::renderer::present::DisplayPipeline;
use crate::renderer::teardown::{ReleaseStage, TeardownReport, TeardownSequence};
use crate::scene::build_scene;

/// Minimum time between window title updates
const TITLE_INTERVAL: Duration = Duration::from_millis(250);

/// Everything the renderer owns on the GPU
pub struct GpuState {
    window: Option<Arc<Window>>,
    context: ComputeContext,
    buffers: InteropBuffers,
    display: Slot<DisplayPipeline>,
    bind_group: Slot<wgpu::BindGroup>,
    bound: [bool; 7],
    kernel_name: String,
    last_present: Option<wgpu::SubmissionIndex>,
    last_title: Option<Instant>,
}

impl GpuState {
    /// Initialize the device, build the program, upload the scene and create
    /// every buffer. Without a window the state renders headless.
    pub async fn new(window: Option<Arc<Window>>, config: &EngineConfig) -> EngineResult<Self> {
        log::info!("[GpuState::new] Starting GPU initialization");
        let init_start = Instant::now();

        let options = config.context_options();
        let mut context = match window.clone() {
            Some(window) => ComputeContext::initialize(window, &options).await?,
            None => ComputeContext::initialize_headless(&options).await?,
        };

        let units = load_program_units(config)?;
        log::info!(
            "[GpuState::new] Building program from {} source unit(s)...",
            units.len()
        );
        context.build_program(&units)?;
        context.extract_kernels(&config.entry_point)?;

        let layout = BufferLayout::for_resolution(config.window_width, config.window_height)?;
        let scene = build_scene(config.scene, layout.width, layout.height)?;
        let buffers = InteropBuffers::create_all(context.device()?, layout, &scene)?;

        let mut display = Slot::empty("display pipeline");
        if let Some(surface_config) = context.surface_config() {
            display.fill(DisplayPipeline::new(
                context.device()?,
                surface_config.format,
                buffers.output().display_view()?,
                layout,
            )?)?;
        }

        log::info!(
            "[GpuState::new] GPU state ready in {:?} ({}x{}, {} primitives)",
            init_start.elapsed(),
            layout.width,
            layout.height,
            buffers.primitive_count()
        );

        Ok(Self {
            window,
            context,
            buffers,
            display,
            bind_group: Slot::empty("kernel bind group"),
            bound: [false; 7],
            kernel_name: config.entry_point.clone(),
            last_present: None,
            last_title: None,
        })
    }

    pub fn context(&self) -> &ComputeContext {
        &self.context
    }

    pub fn buffers(&self) -> &InteropBuffers {
        &self.buffers
    }

    pub fn layout(&self) -> BufferLayout {
        self.buffers.layout()
    }

    pub fn primitive_count(&self) -> u32 {
        self.buffers.primitive_count()
    }

    pub fn window(&self) -> Option<&Arc<Window>> {
        self.window.as_ref()
    }

    fn update_title(&mut self, stats: &FrameStats) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        let due = self
            .last_title
            .map(|t| t.elapsed() >= TITLE_INTERVAL)
            .unwrap_or(true);
        if due {
            window.set_title(&stats.title());
            self.last_title = Some(Instant::now());
        }
    }

    /// Copy the shared output back to the host, one packed RGBA8 value per pixel.
    ///
    /// Only legal while the display owns the buffer, i.e. between frames.
    pub fn read_output(&self) -> EngineResult<Vec<u32>> {
        let device = self.context.device()?;
        let queue = self.context.queue()?;
        let output = self.buffers.output().display_view()?;
        let size = self.buffers.layout().output_bytes();

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Output Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(output, 0, &staging, 0, size);
        queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // Receiver outlives the poll below
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| EngineError::resource("output staging", e))?
            .map_err(|e| EngineError::resource("output staging", e))?;

        let data = slice.get_mapped_range();
        let pixels = bytemuck::cast_slice::<u8, u32>(&data).to_vec();
        // The mapped range must be gone before unmapping
        drop(data);
        staging.unmap();
        Ok(pixels)
    }

    /// Create the kernel bind group once every slot has a value
    fn ensure_bind_group(&mut self, frame: u64) -> EngineResult<()> {
        if self.bind_group.get().is_some() {
            return Ok(());
        }
        if let Some(missing) = ArgSlot::ALL.iter().find(|s| !self.bound[s.index() as usize]) {
            return Err(EngineError::frame(
                FrameStage::Dispatching,
                frame,
                format!("argument slot {} ({:?}) is not bound", missing.index(), missing),
            ));
        }

        let device = self.context.device()?;
        let kernel = self.context.kernel(&self.kernel_name)?;
        let scalars = self.buffers.scalars();
        let layout = kernel.pipeline.get_bind_group_layout(0);

        let resources = [
            (ArgSlot::Output, self.buffers.output().display_view()?),
            (ArgSlot::Primitives, self.buffers.primitives()?),
            (ArgSlot::PrimitiveCount, scalars.primitive_count.require()?),
            (ArgSlot::Camera, self.buffers.camera()?),
            (ArgSlot::Seed, scalars.seed.require()?),
            (ArgSlot::FrameIndex, scalars.frame_index.require()?),
            (ArgSlot::Accumulation, self.buffers.accumulation()?),
        ];
        let entries: Vec<wgpu::BindGroupEntry> = resources
            .iter()
            .map(|(slot, buffer)| wgpu::BindGroupEntry {
                binding: slot.index(),
                resource: buffer.as_entire_binding(),
            })
            .collect();

        let bind_group = capture_errors(device, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Kernel Arguments"),
                layout: &layout,
                entries: &entries,
            })
        })
        .frame_context(FrameStage::Dispatching, frame)?;

        log::debug!("[GpuState::ensure_bind_group] Kernel arguments bound as one bind group");
        self.bind_group.fill(bind_group)?;
        Ok(())
    }

    /// Release every GPU object in order. Safe to call more than once.
    pub fn teardown(&mut self) -> TeardownReport {
        self.bound = [false; 7];
        self.last_present = None;

        let mut sequence = TeardownSequence::new();
        sequence
            .push(ReleaseStage::Display, &mut self.display)
            .push(ReleaseStage::Kernels, &mut self.bind_group)
            .extend(ReleaseStage::Buffers, self.buffers.slots_mut());
        self.context.register_teardown(&mut sequence);
        sequence.run()
    }

    pub fn is_released(&self) -> bool {
        self.display.is_empty()
            && self.bind_group.is_empty()
            && self.buffers.is_released()
            && self.context.is_released()
    }
}

impl Drop for GpuState {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl ArgumentSink for GpuState {
    fn set_arg(&mut self, slot: ArgSlot, arg: KernelArg) -> EngineResult<()> {
        if !slot.accepts(&arg) {
            return Err(EngineError::Config(format!(
                "argument slot {} ({:?}) cannot take {:?}",
                slot.index(),
                slot,
                arg
            )));
        }

        let queue = self.context.queue()?;
        match arg {
            KernelArg::Buffer(BufferRole::Output) => {
                self.buffers.output_mut().wrap_for_compute()?;
            }
            KernelArg::Buffer(BufferRole::Primitives) => {
                self.buffers.primitives()?;
            }
            KernelArg::Buffer(BufferRole::Camera) => {
                self.buffers.camera()?;
            }
            KernelArg::Buffer(BufferRole::Accumulation) => {
                self.buffers.accumulation()?;
            }
            KernelArg::I32(value) => {
                let buffer = self.buffers.scalars().primitive_count.require()?;
                ScalarArgBuffers::write(queue, buffer, &[value as u32]);
            }
            KernelArg::U32(value) => {
                let buffer = self.buffers.scalars().seed.require()?;
                ScalarArgBuffers::write(queue, buffer, &[value]);
            }
            KernelArg::U64(value) => {
                let buffer = self.buffers.scalars().frame_index.require()?;
                ScalarArgBuffers::write(queue, buffer, &[value as u32, (value >> 32) as u32]);
            }
        }

        self.bound[slot.index() as usize] = true;
        Ok(())
    }
}

impl FrameBackend for GpuState {
    type Token = wgpu::SubmissionIndex;

    fn finish_display_work(&mut self, _frame: u64) -> EngineResult<()> {
        if let Some(index) = self.last_present.take() {
            let device = self.context.device()?;
            device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        }
        Ok(())
    }

    fn acquire_shared(&mut self, frame: u64) -> EngineResult<()> {
        // SharedSurface in the driver owns the handoff and the poll in
        // finish_display_work is the barrier, so only liveness is checked here
        self.buffers
            .output()
            .display_view()
            .frame_context(FrameStage::Acquiring, frame)?;
        Ok(())
    }

    fn enqueue_kernel(&mut self, global: [u32; 2], frame: u64) -> EngineResult<Self::Token> {
        self.ensure_bind_group(frame)?;

        let device = self.context.device()?;
        let queue = self.context.queue()?;
        let kernel = self.context.kernel(&self.kernel_name)?;
        let bind_group = self.bind_group.require()?;
        let [groups_x, groups_y] = kernel.workgroups_for(global);

        capture_errors(device, || {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Path Trace Encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Path Trace Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&kernel.pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(groups_x, groups_y, 1);
            }
            queue.submit(Some(encoder.finish()))
        })
        .frame_context(FrameStage::Dispatching, frame)
    }

    fn wait_for(&mut self, token: Self::Token, frame: u64) -> EngineResult<()> {
        let device = self.context.device().frame_context(FrameStage::Waiting, frame)?;
        let started = Instant::now();
        device.poll(wgpu::Maintain::WaitForSubmissionIndex(token));
        log::trace!("[GpuState::wait_for] frame {} completed after {:?}", frame, started.elapsed());
        Ok(())
    }

    fn drain_queue(&mut self, frame: u64) -> EngineResult<()> {
        let device = self.context.device().frame_context(FrameStage::Releasing, frame)?;
        device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn release_shared(&mut self, frame: u64) -> EngineResult<()> {
        // The poll in drain_queue already fenced the kernel; SharedSurface
        // records the handback, so only liveness is checked here
        self.buffers
            .output()
            .display_view()
            .frame_context(FrameStage::Releasing, frame)?;
        Ok(())
    }

    fn present(&mut self, stats: &FrameStats, frame: u64) -> EngineResult<()> {
        let (Some(surface), Some(display)) = (self.context.surface(), self.display.get()) else {
            // Headless: nothing to show
            return Ok(());
        };

        let output = match surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                self.context.reconfigure_surface()?;
                return Err(EngineError::frame(
                    FrameStage::Presenting,
                    frame,
                    "surface was lost and has been reconfigured",
                ));
            }
            Err(e) => return Err(EngineError::frame(FrameStage::Presenting, frame, e)),
        };

        let device = self.context.device()?;
        let queue = self.context.queue()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Present Encoder"),
        });
        display.draw(&mut encoder, &view);
        let index = queue.submit(Some(encoder.finish()));
        output.present();

        self.last_present = Some(index);
        self.update_title(stats);
        Ok(())
    }
}

/// Source units from the configured files, or the built-in kernel
fn load_program_units(config: &EngineConfig) -> EngineResult<Vec<SourceUnit>> {
    if config.kernel_sources.is_empty() {
        log::info!("[GpuState::new] No kernel sources configured, using built-in path tracer");
        return Ok(vec![SourceUnit::builtin()]);
    }

    let mut loader = SourceLoader::new();
    for dir in &config.include_dirs {
        loader.add_include_dir(dir);
    }
    let parents: Vec<PathBuf> = config
        .kernel_sources
        .iter()
        .filter_map(|p| p.parent().map(|d| d.to_path_buf()))
        .collect();
    for dir in parents {
        loader.add_include_dir(dir);
    }
    loader.load_all(&config.kernel_sources)
}

pub async fn run_app(event_loop: EventLoop<()>, config: EngineConfig) -> EngineResult<()> {
    log::info!("[gpu_state::run_app] Creating window...");
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(&config.window_title)
            .with_inner_size(PhysicalSize::new(config.window_width, config.window_height))
            .with_resizable(false)
            .build(&event_loop)
            .init_context(InitStage::Surface)?,
    );

    log::info!("[gpu_state::run_app] Creating GPU state...");
    let mut gpu_state = GpuState::new(Some(window.clone()), &config).await?;

    let binder = KernelArgumentBinder::new(SeedSequence::from_config(config.seed));
    let layout = gpu_state.layout();
    let mut driver = FrameDriver::new(layout.width, layout.height, binder, config.driver_options());
    let primitive_count = gpu_state.primitive_count();
    driver.bind_static(&mut gpu_state, primitive_count)?;

    let mut fatal: Option<EngineError> = None;
    window.request_redraw();

    event_loop
        .run(|event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);
            match event {
                Event::WindowEvent { ref event, window_id } if window_id == window.id() => match event {
                    WindowEvent::CloseRequested => elwt.exit(),
                    WindowEvent::KeyboardInput { event, .. } => {
                        if event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                            && event.state == ElementState::Pressed
                        {
                            elwt.exit();
                        }
                    }
                    WindowEvent::Resized(size) => {
                        // Fixed resolution for the whole run
                        log::debug!("[gpu_state::run_app] Ignoring resize to {}x{}", size.width, size.height);
                    }
                    WindowEvent::RedrawRequested => match driver.run_frame(&mut gpu_state) {
                        Ok(report) => {
                            log::trace!(
                                "[gpu_state::run_app] frame {} in {:?}",
                                report.frame_index,
                                report.stats.frame_time
                            );
                        }
                        Err(err) if err.class().is_fatal() => {
                            log::error!("[gpu_state::run_app] Fatal error: {}", err);
                            fatal = Some(err);
                            elwt.exit();
                        }
                        Err(err) => {
                            if driver.failure_streak() {
                                let streak = driver.streak_error(err);
                                log::error!("[gpu_state::run_app] {}", streak);
                                fatal = Some(streak);
                                elwt.exit();
                            }
                        }
                    },
                    _ => {}
                },
                Event::AboutToWait => window.request_redraw(),
                _ => {}
            }
        })
        .init_context(InitStage::Platform)?;

    log::info!(
        "[gpu_state::run_app] Rendered {} frame(s), {} failed",
        driver.frames_completed(),
        driver.total_failures()
    );
    gpu_state.teardown();

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

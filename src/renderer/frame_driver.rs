//! Per-frame protocol
//!
//! `Idle -> Acquiring -> Dispatching -> Waiting -> Releasing -> Presenting -> Idle`
//!
//! The driver owns the ownership state of the shared surface and the argument
//! binder; everything that touches the GPU goes through a [`FrameBackend`].
//! A failed frame always ends back in `Idle` with the context intact. Once
//! the surface was acquired it is released on every path, and once a kernel
//! was dispatched it is always waited for.

use std::time::{Duration, Instant};

use crate::error::{EngineError, EngineResult};
use crate::gpu::SharedSurface;
use crate::renderer::binder::{ArgumentSink, DynamicArgs, KernelArgumentBinder};
use crate::renderer::gpu_recovery::FrameHealthMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Dispatching,
    Waiting,
    Releasing,
    Presenting,
}

/// GPU operations the driver sequences. Implemented by the real GPU state
/// and by test doubles.
pub trait FrameBackend: ArgumentSink {
    /// Completion token of an enqueued dispatch
    type Token;

    /// Barrier: all pending display work on the shared surface has finished
    fn finish_display_work(&mut self, frame: u64) -> EngineResult<()>;

    /// Hand the shared surface to compute
    fn acquire_shared(&mut self, frame: u64) -> EngineResult<()>;

    /// Launch the kernel over a `global[0]` x `global[1]` grid
    fn enqueue_kernel(&mut self, global: [u32; 2], frame: u64) -> EngineResult<Self::Token>;

    /// Block until the dispatch behind `token` has completed
    fn wait_for(&mut self, token: Self::Token, frame: u64) -> EngineResult<()>;

    /// Full queue sync
    fn drain_queue(&mut self, frame: u64) -> EngineResult<()>;

    /// Hand the shared surface back to display
    fn release_shared(&mut self, frame: u64) -> EngineResult<()>;

    fn present(&mut self, stats: &FrameStats, frame: u64) -> EngineResult<()>;
}

/// Throughput of one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub frame_index: u64,
    pub frame_time: Duration,
    pub fps: f64,
    pub samples_per_second: f64,
}

impl FrameStats {
    fn measure(frame_index: u64, frame_time: Duration, pixels: u64) -> Self {
        let secs = frame_time.as_secs_f64();
        let fps = if secs > 0.0 { 1.0 / secs } else { 0.0 };
        Self {
            frame_index,
            frame_time,
            fps,
            // One sample per pixel per frame
            samples_per_second: fps * pixels as f64,
        }
    }

    /// Window title carrying the frame rate
    pub fn title(&self) -> String {
        format!("Ray Tracing Demo ({:.3} FPS)", self.fps)
    }
}

/// Outcome of a successful frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub seed: u32,
    pub stats: FrameStats,
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub max_consecutive_failures: u32,
    /// How often throughput is written to the log
    pub stats_interval: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            stats_interval: Duration::from_secs(5),
        }
    }
}

/// Averages throughput between periodic log lines
#[derive(Debug)]
struct ThroughputLog {
    interval: Duration,
    window_start: Instant,
    frames: u64,
    busy: Duration,
}

impl ThroughputLog {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: Instant::now(),
            frames: 0,
            busy: Duration::ZERO,
        }
    }

    fn record(&mut self, stats: &FrameStats, pixels: u64) {
        self.frames += 1;
        self.busy += stats.frame_time;

        let elapsed = self.window_start.elapsed();
        if elapsed >= self.interval && self.frames > 0 {
            let fps = self.frames as f64 / elapsed.as_secs_f64();
            log::info!(
                "[FrameDriver] frame {}: {:.3} FPS, {:.1} Msamples/s, {:.2} ms average frame time",
                stats.frame_index,
                fps,
                fps * pixels as f64 / 1.0e6,
                self.busy.as_secs_f64() * 1000.0 / self.frames as f64
            );
            self.window_start = Instant::now();
            self.frames = 0;
            self.busy = Duration::ZERO;
        }
    }
}

pub struct FrameDriver {
    global_size: [u32; 2],
    state: FrameState,
    surface: SharedSurface,
    binder: KernelArgumentBinder,
    health: FrameHealthMonitor,
    throughput: ThroughputLog,
    frames_completed: u64,
}

impl FrameDriver {
    pub fn new(width: u32, height: u32, binder: KernelArgumentBinder, options: DriverOptions) -> Self {
        Self {
            global_size: [width, height],
            state: FrameState::Idle,
            surface: SharedSurface::new(),
            binder,
            health: FrameHealthMonitor::new(options.max_consecutive_failures),
            throughput: ThroughputLog::new(options.stats_interval),
            frames_completed: 0,
        }
    }

    /// Run one iteration of the protocol.
    ///
    /// Errors are per-frame: the driver is back in `Idle` and can run the
    /// next frame. Check [`Self::failure_streak`] for the fatal policy.
    pub fn run_frame<B: FrameBackend>(&mut self, backend: &mut B) -> EngineResult<FrameReport> {
        let frame = self.binder.next_frame();
        let started = Instant::now();

        let result = self.drive(backend, frame, started);
        self.state = FrameState::Idle;

        match result {
            Ok(report) => {
                self.health.record_success();
                self.frames_completed += 1;
                Ok(report)
            }
            Err(err) => {
                self.binder.invalidate();
                self.health.record_failure(&err);
                Err(err)
            }
        }
    }

    fn drive<B: FrameBackend>(&mut self, backend: &mut B, frame: u64, started: Instant) -> EngineResult<FrameReport> {
        // A release that failed last frame must succeed before the next acquire
        if self.surface.is_compute_owned() {
            log::warn!("[FrameDriver::run_frame] Retrying release left over from a failed frame");
            self.state = FrameState::Releasing;
            self.release(backend, frame)?;
        }

        // Only argument rebinding happens while idle
        self.binder.bind_dynamic(backend)?;

        self.state = FrameState::Acquiring;
        backend.finish_display_work(frame)?;
        self.surface.begin_acquire(frame)?;
        let acquired = backend.acquire_shared(frame);
        self.surface.finish_acquire(acquired.is_ok());
        acquired?;

        let dispatched = self.dispatch_and_wait(backend, frame);

        self.state = FrameState::Releasing;
        let released = self.release(backend, frame);

        let args = match (dispatched, released) {
            (Ok(args), Ok(())) => args,
            (Err(err), Ok(())) => return Err(err),
            (Ok(_), Err(err)) => return Err(err),
            (Err(err), Err(release_err)) => {
                log::warn!("[FrameDriver::run_frame] Release also failed: {}", release_err);
                return Err(err);
            }
        };

        self.state = FrameState::Presenting;
        let pixels = self.global_size[0] as u64 * self.global_size[1] as u64;
        let stats = FrameStats::measure(args.frame_index, started.elapsed(), pixels);
        backend.present(&stats, frame)?;
        self.throughput.record(&stats, pixels);

        Ok(FrameReport {
            frame_index: args.frame_index,
            seed: args.seed,
            stats,
        })
    }

    fn dispatch_and_wait<B: FrameBackend>(&mut self, backend: &mut B, frame: u64) -> EngineResult<DynamicArgs> {
        self.state = FrameState::Dispatching;
        let args = self.binder.ensure_dispatchable()?;
        let token = backend.enqueue_kernel(self.global_size, frame)?;

        // Submitted kernels add a sample whether or not the wait succeeds,
        // so the index is spent as soon as the dispatch is on the queue
        self.binder.commit();

        self.state = FrameState::Waiting;
        backend.wait_for(token, frame)?;
        Ok(args)
    }

    fn release<B: FrameBackend>(&mut self, backend: &mut B, frame: u64) -> EngineResult<()> {
        backend.drain_queue(frame)?;
        self.surface.begin_release(frame)?;
        let released = backend.release_shared(frame);
        self.surface.finish_release(released.is_ok());
        released
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn surface(&self) -> &SharedSurface {
        &self.surface
    }

    pub fn binder(&self) -> &KernelArgumentBinder {
        &self.binder
    }

    /// Bind the static arguments through `backend`
    pub fn bind_static<B: FrameBackend>(&mut self, backend: &mut B, primitive_count: u32) -> EngineResult<()> {
        self.binder.bind_static(
            backend,
            crate::renderer::binder::StaticArgs { primitive_count },
        )
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.health.consecutive_failures()
    }

    pub fn total_failures(&self) -> u64 {
        self.health.total_failures()
    }

    /// True once `max_consecutive_failures` frames failed in a row
    pub fn failure_streak(&self) -> bool {
        self.health.is_streak()
    }

    /// Wrap the last frame error into the fatal streak error
    pub fn streak_error(&self, last: EngineError) -> EngineError {
        EngineError::FrameStreak {
            count: self.health.consecutive_failures(),
            last: Box::new(last),
        }
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames_completed
    }

    pub fn global_size(&self) -> [u32; 2] {
        self.global_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_format() {
        let stats = FrameStats::measure(1, Duration::from_millis(80), 100);
        assert_eq!(stats.title(), "Ray Tracing Demo (12.500 FPS)");
        assert!((stats.samples_per_second - 1250.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_duration_has_zero_fps() {
        let stats = FrameStats::measure(1, Duration::ZERO, 100);
        assert_eq!(stats.fps, 0.0);
    }
}

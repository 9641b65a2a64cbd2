/// Headless GPU Pipeline Tests
///
/// Runs the real device path without a window: program build, buffer
/// creation, static and dynamic binding, dispatch and teardown. Skipped
/// when no adapter is available.
use raytrace_engine::error::{EngineError, ErrorClass, InitStage};
use raytrace_engine::gpu::{ComputeContext, ContextOptions, SourceUnit};
use raytrace_engine::renderer::{
    ArgSlot, ArgumentSink, FrameDriver, GpuState, KernelArg, KernelArgumentBinder, SeedSequence,
};
use raytrace_engine::EngineConfig;

fn test_config() -> EngineConfig {
    EngineConfig {
        window_width: 64,
        window_height: 48,
        seed: Some(1),
        ..EngineConfig::default()
    }
}

/// Create a headless GPU state for tests
fn init_gpu(config: &EngineConfig) -> Option<GpuState> {
    match pollster::block_on(GpuState::new(None, config)) {
        Ok(state) => Some(state),
        Err(err) if err.class() == ErrorClass::FatalInit => {
            println!("Skipping GPU test - {}", err);
            None
        }
        Err(err) => panic!("GPU state creation failed: {}", err),
    }
}

fn driver_for(state: &GpuState, config: &EngineConfig) -> FrameDriver {
    let layout = state.layout();
    FrameDriver::new(
        layout.width,
        layout.height,
        KernelArgumentBinder::new(SeedSequence::from_config(config.seed)),
        config.driver_options(),
    )
}

#[test]
fn test_headless_frames_fill_output() {
    let config = test_config();
    let Some(mut state) = init_gpu(&config) else {
        return;
    };
    assert!(state.context().is_ready());
    assert_eq!(state.primitive_count(), 12);

    let mut driver = driver_for(&state, &config);
    let count = state.primitive_count();
    driver.bind_static(&mut state, count).expect("static bind");

    for expected in 1..=3u64 {
        let report = driver.run_frame(&mut state).expect("frame succeeds");
        assert_eq!(report.frame_index, expected);
    }
    assert_eq!(driver.surface().acquire_count(), 3);
    assert_eq!(driver.surface().release_count(), 3);

    let pixels = state.read_output().expect("read back output");
    assert_eq!(pixels.len(), 64 * 48);
    // Every pixel was written with an opaque alpha
    assert!(pixels.iter().all(|p| p >> 24 == 0xFF));

    let report = state.teardown();
    assert!(report.released_count() > 0);
    assert!(state.is_released());
    assert!(state.teardown().is_noop());
}

#[test]
fn test_static_arguments_bind_once() {
    let config = test_config();
    let Some(mut state) = init_gpu(&config) else {
        return;
    };

    let mut driver = driver_for(&state, &config);
    let count = state.primitive_count();
    driver.bind_static(&mut state, count).expect("first static bind");

    let err = driver.bind_static(&mut state, count).expect_err("second static bind");
    assert!(matches!(
        err,
        EngineError::Init {
            stage: InitStage::StaticBind,
            ..
        }
    ));
}

#[test]
fn test_mistyped_argument_is_rejected() {
    let config = test_config();
    let Some(mut state) = init_gpu(&config) else {
        return;
    };

    let err = state
        .set_arg(ArgSlot::Seed, KernelArg::U64(5))
        .expect_err("seed is a u32 slot");
    assert_eq!(err.class(), ErrorClass::Config);
}

#[test]
fn test_dispatch_before_static_bind_fails_cleanly() {
    let config = test_config();
    let Some(mut state) = init_gpu(&config) else {
        return;
    };

    let mut driver = driver_for(&state, &config);
    let err = driver.run_frame(&mut state).expect_err("no static bind");
    assert_eq!(err.class(), ErrorClass::TransientFrame);
    assert!(driver.surface().is_display_owned());
}

#[test]
fn test_failed_rebuild_keeps_program_and_kernels() {
    let mut context = match pollster::block_on(ComputeContext::initialize_headless(&ContextOptions::default())) {
        Ok(context) => context,
        Err(err) if err.class() == ErrorClass::FatalInit => {
            println!("Skipping GPU test - {}", err);
            return;
        }
        Err(err) => panic!("context creation failed: {}", err),
    };

    context.build_program(&[SourceUnit::builtin()]).expect("built-in program builds");
    context.extract_kernels("kernel_main").expect("kernel_main extracted");

    let err = context
        .build_program(&[SourceUnit::new("broken.wgsl", "this is not wgsl")])
        .err()
        .expect("broken rebuild fails");
    assert!(matches!(err, EngineError::Build { .. }));

    assert!(context.program().is_some());
    assert!(context.kernel("kernel_main").is_ok());
}

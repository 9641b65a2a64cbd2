/// Program Build Tests
///
/// Front-end compilation of kernel programs: multi-file sources, includes,
/// diagnostics and keeping the previous program when a rebuild fails.
/// None of these need a GPU.
use std::fs;

use raytrace_engine::error::{EngineError, InitStage};
use raytrace_engine::gpu::{workgroup_count, Releasable, Slot, SourceLoader, SourceUnit, ValidatedSource};

const HELPERS: &str = r#"
fn luminance(c: vec3<f32>) -> f32 {
    return dot(c, vec3<f32>(0.2126, 0.7152, 0.0722));
}
"#;

const KERNEL: &str = r#"
@group(0) @binding(0) var<storage, read_write> out_pixels: array<u32>;

@compute @workgroup_size(16, 4, 1)
fn kernel_main(@builtin(global_invocation_id) id: vec3<u32>) {
    out_pixels[id.x] = u32(luminance(vec3<f32>(1.0)) * 255.0);
}
"#;

#[test]
fn test_builtin_program_compiles() {
    let source = ValidatedSource::compile(&[SourceUnit::builtin()]).expect("built-in kernel compiles");
    let entry = source.require_entry_point("kernel_main").expect("kernel_main present");
    assert_eq!(entry.workgroup_size, [8, 8, 1]);
}

#[test]
fn test_units_compile_in_order() {
    let units = [
        SourceUnit::new("helpers.wgsl", HELPERS),
        SourceUnit::new("kernel.wgsl", KERNEL),
    ];
    let source = ValidatedSource::compile(&units).expect("program compiles");
    assert_eq!(source.unit_names().collect::<Vec<_>>(), vec!["helpers.wgsl", "kernel.wgsl"]);
    assert_eq!(source.entry_points().len(), 1);
    assert_eq!(source.entry_points()[0].workgroup_size, [16, 4, 1]);
}

#[test]
fn test_include_is_spliced_from_disk() {
    let dir = tempfile::tempdir().expect("temp dir");
    fs::write(dir.path().join("helpers.wgsl"), HELPERS).expect("write helpers");
    let kernel_path = dir.path().join("kernel.wgsl");
    fs::write(&kernel_path, format!("#include \"helpers.wgsl\"\n{}", KERNEL)).expect("write kernel");

    let mut loader = SourceLoader::new();
    loader.add_include_dir(dir.path());
    let units = loader.load_all(&[&kernel_path]).expect("sources load");
    assert_eq!(units.len(), 1);
    assert!(units[0].text.contains("fn luminance"));
    assert!(!units[0].text.contains("#include"));

    ValidatedSource::compile(&units).expect("expanded program compiles");
}

#[test]
fn test_syntax_error_reports_full_log() {
    let units = [
        SourceUnit::new("helpers.wgsl", HELPERS),
        SourceUnit::new("broken.wgsl", "fn oops() {\n    let x = ;\n}\n"),
    ];
    let err = ValidatedSource::compile(&units).expect_err("broken program");
    match &err {
        EngineError::Build { log } => {
            assert!(log.contains("broken.wgsl"), "log: {}", log);
            assert!(!log.is_empty());
        }
        other => panic!("expected a build error, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn test_missing_entry_point_is_init_error() {
    let source = ValidatedSource::compile(&[SourceUnit::new("helpers.wgsl", HELPERS)]).expect("compiles");
    assert!(source.entry_points().is_empty());
    let err = source.require_entry_point("kernel_main").expect_err("no kernels");
    assert!(matches!(
        err,
        EngineError::Init {
            stage: InitStage::KernelEntryPoint,
            ..
        }
    ));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_failed_rebuild_keeps_previous_program() {
    let mut program: Slot<ValidatedSource> = Slot::empty("program");
    program
        .replace_with(|_| ValidatedSource::compile(&[SourceUnit::builtin()]))
        .expect("first build");
    let before = program.require().expect("program live").text().to_string();

    let broken = [SourceUnit::new("broken.wgsl", "this is not wgsl")];
    let err = program
        .replace_with(|_| ValidatedSource::compile(&broken))
        .expect_err("rebuild fails");
    assert!(matches!(err, EngineError::Build { .. }));

    assert!(!program.is_empty());
    assert_eq!(program.require().expect("still live").text(), before);
}

#[test]
fn test_workgroup_count_covers_image() {
    assert_eq!(workgroup_count([600, 600], [8, 8, 1]), [75, 75]);
    assert_eq!(workgroup_count([601, 1], [8, 8, 1]), [76, 1]);
    assert_eq!(workgroup_count([1, 1], [16, 4, 1]), [1, 1]);
}

//! Compute program build and kernel extraction
//!
//! A program is compiled from an ordered list of [`SourceUnit`]s. The units
//! are concatenated, parsed and validated with naga first, so a syntax or
//! type error produces the complete compiler report without touching the
//! device. Only a program that passed the front end becomes a
//! `wgpu::ShaderModule`; every `@compute` entry point of that module is then
//! turned into a [`Kernel`].

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult, InitStage};
use crate::gpu::capture_errors;

/// Entry point name used by the progressive renderer
pub const DEFAULT_KERNEL_NAME: &str = "kernel_main";

/// Built-in path tracing program, used when no source files are configured
pub const BUILTIN_KERNEL_SOURCE: &str = include_str!("../renderer/shaders/path_trace.wgsl");

/// One named piece of program text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub name: String,
    pub text: String,
}

impl SourceUnit {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    pub fn builtin() -> Self {
        Self::new("builtin/path_trace.wgsl", BUILTIN_KERNEL_SOURCE)
    }
}

/// Where each unit starts inside the concatenated program text
#[derive(Debug, Clone)]
struct UnitSpan {
    name: String,
    first_line: usize,
    line_count: usize,
}

/// A compute entry point found in the program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointInfo {
    pub name: String,
    pub workgroup_size: [u32; 3],
}

/// Program text that passed parsing and validation
#[derive(Debug)]
pub struct ValidatedSource {
    text: String,
    units: Vec<UnitSpan>,
    entry_points: Vec<EntryPointInfo>,
}

impl ValidatedSource {
    /// Parse and validate the concatenation of `units`.
    ///
    /// Fails with [`EngineError::Build`] carrying the full diagnostic log.
    pub fn compile(units: &[SourceUnit]) -> EngineResult<Self> {
        if units.is_empty() {
            return Err(EngineError::Build {
                log: "no source units were supplied".to_string(),
            });
        }

        let (text, spans) = concatenate(units);
        let program_name = spans
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(" + ");

        let module = naga::front::wgsl::parse_str(&text).map_err(|error| {
            let mut log = String::new();
            if let Some(location) = error.location(&text) {
                if let Some((unit, line)) = locate(&spans, location.line_number as usize) {
                    log.push_str(&format!(
                        "error in {} at line {}, column {}\n",
                        unit, line, location.line_position
                    ));
                }
            }
            log.push_str(&error.emit_to_string_with_path(&text, &program_name));
            EngineError::Build { log }
        })?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator.validate(&module).map_err(|error| EngineError::Build {
            log: format!("{}: {}", program_name, error_chain(&error)),
        })?;

        let entry_points = module
            .entry_points
            .iter()
            .filter(|ep| ep.stage == naga::ShaderStage::Compute)
            .map(|ep| EntryPointInfo {
                name: ep.name.clone(),
                workgroup_size: ep.workgroup_size,
            })
            .collect();

        Ok(Self {
            text,
            units: spans,
            entry_points,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn unit_names(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.name.as_str())
    }

    /// All compute entry points, in declaration order
    pub fn entry_points(&self) -> &[EntryPointInfo] {
        &self.entry_points
    }

    /// Look up the entry point the pipeline needs
    pub fn require_entry_point(&self, name: &str) -> EngineResult<&EntryPointInfo> {
        self.entry_points.iter().find(|ep| ep.name == name).ok_or_else(|| {
            let found: Vec<&str> = self.entry_points.iter().map(|ep| ep.name.as_str()).collect();
            EngineError::init(
                InitStage::KernelEntryPoint,
                format!("entry point '{}' not found (program defines {:?})", name, found),
            )
        })
    }
}

fn concatenate(units: &[SourceUnit]) -> (String, Vec<UnitSpan>) {
    let mut text = String::new();
    let mut spans = Vec::with_capacity(units.len());
    let mut line = 1;

    for unit in units {
        let line_count = unit.text.lines().count().max(1);
        spans.push(UnitSpan {
            name: unit.name.clone(),
            first_line: line,
            line_count,
        });
        text.push_str(&unit.text);
        if !unit.text.ends_with('\n') {
            text.push('\n');
        }
        line += line_count;
    }

    (text, spans)
}

/// Map a line of the concatenated text back to (unit, line within unit)
fn locate(spans: &[UnitSpan], line: usize) -> Option<(&str, usize)> {
    spans
        .iter()
        .find(|s| line >= s.first_line && line < s.first_line + s.line_count)
        .map(|s| (s.name.as_str(), line - s.first_line + 1))
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str("\n  caused by: ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// A compiled program living on the device
pub struct ComputeProgram {
    source: ValidatedSource,
    module: wgpu::ShaderModule,
}

impl ComputeProgram {
    /// Compile `units` for `device`
    pub fn build(device: &wgpu::Device, units: &[SourceUnit]) -> EngineResult<Self> {
        let source = ValidatedSource::compile(units)?;

        let module = capture_errors(device, || {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Path Trace Program"),
                source: wgpu::ShaderSource::Wgsl(source.text().to_owned().into()),
            })
        })
        .map_err(|e| EngineError::Build { log: e.to_string() })?;

        log::info!(
            "[ComputeProgram::build] Built program from {} unit(s) with {} compute entry point(s)",
            source.units.len(),
            source.entry_points.len()
        );

        Ok(Self { source, module })
    }

    pub fn source(&self) -> &ValidatedSource {
        &self.source
    }

    pub fn module(&self) -> &wgpu::ShaderModule {
        &self.module
    }
}

/// One entry point turned into a dispatchable pipeline
pub struct Kernel {
    pub name: String,
    pub workgroup_size: [u32; 3],
    pub pipeline: wgpu::ComputePipeline,
}

impl Kernel {
    /// Workgroups needed to cover `global_size` work items
    pub fn workgroups_for(&self, global_size: [u32; 2]) -> [u32; 2] {
        workgroup_count(global_size, self.workgroup_size)
    }
}

/// All kernels of a program, by entry point name
pub struct KernelSet {
    kernels: HashMap<String, Kernel>,
}

impl KernelSet {
    /// Create one compute pipeline per compute entry point of `program`
    pub fn extract(device: &wgpu::Device, program: &ComputeProgram) -> EngineResult<Self> {
        let mut kernels = HashMap::new();

        for ep in program.source().entry_points() {
            let pipeline = capture_errors(device, || {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(&ep.name),
                    layout: None,
                    module: program.module(),
                    entry_point: &ep.name,
                })
            })
            .map_err(|e| EngineError::Build {
                log: format!("kernel '{}': {}", ep.name, e),
            })?;

            log::debug!(
                "[KernelSet::extract] Kernel '{}' with workgroup size {:?}",
                ep.name,
                ep.workgroup_size
            );

            kernels.insert(
                ep.name.clone(),
                Kernel {
                    name: ep.name.clone(),
                    workgroup_size: ep.workgroup_size,
                    pipeline,
                },
            );
        }

        Ok(Self { kernels })
    }

    pub fn get(&self, name: &str) -> Option<&Kernel> {
        self.kernels.get(name)
    }

    /// The named kernel, or a fatal configuration error
    pub fn require(&self, name: &str) -> EngineResult<&Kernel> {
        self.kernels.get(name).ok_or_else(|| {
            EngineError::init(
                InitStage::KernelEntryPoint,
                format!("kernel '{}' is not part of the program", name),
            )
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kernels.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// Ceiling division of a 2-D grid by a workgroup size
pub fn workgroup_count(global_size: [u32; 2], workgroup_size: [u32; 3]) -> [u32; 2] {
    let wx = workgroup_size[0].max(1);
    let wy = workgroup_size[1].max(1);
    [
        (global_size[0] + wx - 1) / wx,
        (global_size[1] + wy - 1) / wy,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const KERNEL: &str = r#"
@group(0) @binding(0) var<storage, read_write> out: array<u32>;

@compute @workgroup_size(8, 8, 1)
fn kernel_main(@builtin(global_invocation_id) id: vec3<u32>) {
    out[id.x] = id.y;
}

@compute @workgroup_size(64)
fn clear(@builtin(global_invocation_id) id: vec3<u32>) {
    out[id.x] = 0u;
}
"#;

    #[test]
    fn test_entry_points_are_enumerated() {
        let source = ValidatedSource::compile(&[SourceUnit::new("k.wgsl", KERNEL)])
            .expect("valid program");
        let names: Vec<&str> = source.entry_points().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["kernel_main", "clear"]);

        let main = source.require_entry_point("kernel_main").expect("main exists");
        assert_eq!(main.workgroup_size, [8, 8, 1]);
    }

    #[test]
    fn test_missing_entry_point_is_init_error() {
        let source = ValidatedSource::compile(&[SourceUnit::new("k.wgsl", KERNEL)])
            .expect("valid program");
        let err = source.require_entry_point("kernelMain").expect_err("absent");
        assert!(matches!(
            err,
            EngineError::Init { stage: InitStage::KernelEntryPoint, .. }
        ));
    }

    #[test]
    fn test_syntax_error_yields_log_naming_unit() {
        let units = [
            SourceUnit::new("types.wgsl", "struct Ray { origin: vec3<f32>, dir: vec3<f32> }\n"),
            SourceUnit::new("broken.wgsl", "fn oops( {\n"),
        ];
        let err = ValidatedSource::compile(&units).expect_err("syntax error");
        match err {
            EngineError::Build { log } => {
                assert!(!log.is_empty());
                assert!(log.contains("broken.wgsl"), "log was: {}", log);
            }
            other => panic!("expected build error, got {other:?}"),
        }
    }

    #[test]
    fn test_units_are_concatenated_in_order() {
        let units = [
            SourceUnit::new("a.wgsl", "const SCALE: u32 = 2u;"),
            SourceUnit::new(
                "b.wgsl",
                "@group(0) @binding(0) var<storage, read_write> v: array<u32>;\n\
                 @compute @workgroup_size(1) fn kernel_main() { v[0] = SCALE; }",
            ),
        ];
        let source = ValidatedSource::compile(&units).expect("units link");
        assert!(source.text().find("SCALE: u32").unwrap() < source.text().find("fn kernel_main").unwrap());
        assert_eq!(source.unit_names().collect::<Vec<_>>(), vec!["a.wgsl", "b.wgsl"]);
    }

    #[test]
    fn test_empty_unit_list_is_rejected() {
        assert!(matches!(
            ValidatedSource::compile(&[]),
            Err(EngineError::Build { .. })
        ));
    }

    #[test]
    fn test_builtin_program_exposes_kernel_main() {
        let source = ValidatedSource::compile(&[SourceUnit::builtin()]).expect("builtin compiles");
        assert!(source.require_entry_point(DEFAULT_KERNEL_NAME).is_ok());
    }

    #[test]
    fn test_workgroup_count_rounds_up() {
        assert_eq!(workgroup_count([600, 600], [8, 8, 1]), [75, 75]);
        assert_eq!(workgroup_count([601, 599], [16, 8, 1]), [38, 75]);
        assert_eq!(workgroup_count([1, 1], [0, 0, 0]), [1, 1]);
    }

    #[test]
    fn test_locate_maps_lines_back_to_units() {
        let (_, spans) = concatenate(&[
            SourceUnit::new("a", "l1\nl2\n"),
            SourceUnit::new("b", "l3\nl4\nl5"),
        ]);
        assert_eq!(locate(&spans, 2), Some(("a", 2)));
        assert_eq!(locate(&spans, 3), Some(("b", 1)));
        assert_eq!(locate(&spans, 5), Some(("b", 3)));
        assert_eq!(locate(&spans, 6), None);
    }
}

//! Buffers shared between the compute kernel and the display pipeline

use bytemuck::Zeroable;
use wgpu::util::DeviceExt;

use crate::error::{EngineError, EngineResult};
use crate::gpu::capture_errors;
use crate::gpu::handle::{Releasable, Slot};
use crate::scene::{CameraParams, SceneSnapshot, Sphere, MAX_PRIMITIVES};

/// One accumulation entry: running RGB sum, padded to the 16-byte stride a
/// `vec3<f32>` has in a storage array
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AccumPixel {
    pub rgb: [f32; 3],
    _pad: f32,
}

/// Bytes per pixel of the shared output (packed RGBA8)
pub const OUTPUT_PIXEL_BYTES: u64 = 4;

/// Scalar kernel arguments are bound as 16-byte uniforms
pub const SCALAR_ARG_BYTES: u64 = 16;

/// Element counts and byte sizes of every per-pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub width: u32,
    pub height: u32,
}

impl BufferLayout {
    pub fn for_resolution(width: u32, height: u32) -> EngineResult<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::Config(format!(
                "render resolution must be non-zero, got {}x{}",
                width, height
            )));
        }
        Ok(Self { width, height })
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn output_elements(&self) -> u64 {
        self.pixel_count()
    }

    pub fn output_bytes(&self) -> u64 {
        self.output_elements() * OUTPUT_PIXEL_BYTES
    }

    pub fn accumulation_elements(&self) -> u64 {
        self.pixel_count()
    }

    pub fn accumulation_bytes(&self) -> u64 {
        self.accumulation_elements() * std::mem::size_of::<AccumPixel>() as u64
    }

    pub fn primitive_bytes(&self) -> u64 {
        (MAX_PRIMITIVES * std::mem::size_of::<Sphere>()) as u64
    }

    pub fn camera_bytes(&self) -> u64 {
        std::mem::size_of::<CameraParams>() as u64
    }

    /// Reject sizes the device cannot bind, before asking it to allocate
    pub fn check_limits(&self, limits: &wgpu::Limits) -> EngineResult<()> {
        let binding_limit = limits.max_storage_buffer_binding_size as u64;
        for (name, bytes) in [
            ("output", self.output_bytes()),
            ("accumulation", self.accumulation_bytes()),
        ] {
            if bytes > binding_limit || bytes > limits.max_buffer_size {
                return Err(EngineError::resource(
                    name,
                    format!(
                        "{} bytes for {}x{} exceeds the device limit of {} bytes",
                        bytes,
                        self.width,
                        self.height,
                        binding_limit.min(limits.max_buffer_size)
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Tracks whether a display-side buffer has been wrapped for compute access
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WrapState {
    wrapped: bool,
}

impl WrapState {
    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    /// Wrap once per buffer lifetime
    pub fn wrap(&mut self) -> EngineResult<()> {
        if self.wrapped {
            return Err(EngineError::resource(
                "output",
                "buffer is already wrapped for compute; release and recreate it first",
            ));
        }
        self.wrapped = true;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.wrapped = false;
    }
}

/// Pixel buffer read by the display pipeline and written by the kernel
#[derive(Debug)]
pub struct SharedOutput {
    buffer: Slot<wgpu::Buffer>,
    wrap: WrapState,
}

impl SharedOutput {
    fn new() -> Self {
        Self {
            buffer: Slot::empty("output buffer"),
            wrap: WrapState::default(),
        }
    }

    /// Display-side view, always available while the buffer is live
    pub fn display_view(&self) -> EngineResult<&wgpu::Buffer> {
        self.buffer.require()
    }

    /// Compute-side view. Granted once per buffer lifetime.
    pub fn wrap_for_compute(&mut self) -> EngineResult<&wgpu::Buffer> {
        if self.buffer.is_empty() {
            return Err(EngineError::resource("output", "cannot wrap a buffer that does not exist"));
        }
        self.wrap.wrap()?;
        self.buffer.require()
    }

    pub fn is_wrapped(&self) -> bool {
        self.wrap.is_wrapped()
    }
}

impl Releasable for SharedOutput {
    fn release(&mut self) -> bool {
        self.wrap.reset();
        self.buffer.release()
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn label(&self) -> &'static str {
        self.buffer.label()
    }
}

/// Uniform buffers backing the scalar kernel arguments
#[derive(Debug)]
pub struct ScalarArgBuffers {
    pub primitive_count: Slot<wgpu::Buffer>,
    pub seed: Slot<wgpu::Buffer>,
    pub frame_index: Slot<wgpu::Buffer>,
}

impl ScalarArgBuffers {
    fn new() -> Self {
        Self {
            primitive_count: Slot::empty("primitive count argument"),
            seed: Slot::empty("seed argument"),
            frame_index: Slot::empty("frame index argument"),
        }
    }

    fn create(&mut self, device: &wgpu::Device) -> EngineResult<()> {
        for (slot, name) in [
            (&mut self.primitive_count, "primitive count"),
            (&mut self.seed, "seed"),
            (&mut self.frame_index, "frame index"),
        ] {
            let buffer = capture_errors(device, || {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(name),
                    size: SCALAR_ARG_BYTES,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .map_err(|e| EngineError::resource(name, e))?;
            slot.fill(buffer)?;
        }
        Ok(())
    }

    /// Write a scalar into the first words of a 16-byte uniform
    pub fn write(queue: &wgpu::Queue, buffer: &wgpu::Buffer, words: &[u32]) {
        let mut data = [0u32; 4];
        for (dst, src) in data.iter_mut().zip(words) {
            *dst = *src;
        }
        queue.write_buffer(buffer, 0, bytemuck::cast_slice(&data));
    }

    pub fn slots_mut(&mut self) -> [&mut dyn Releasable; 3] {
        [&mut self.primitive_count, &mut self.seed, &mut self.frame_index]
    }
}

/// All buffers the kernel reads or writes
#[derive(Debug)]
pub struct InteropBuffers {
    layout: BufferLayout,
    output: SharedOutput,
    primitives: Slot<wgpu::Buffer>,
    primitive_count: u32,
    camera: Slot<wgpu::Buffer>,
    accumulation: Slot<wgpu::Buffer>,
    scalars: ScalarArgBuffers,
}

impl InteropBuffers {
    pub fn new(layout: BufferLayout) -> Self {
        Self {
            layout,
            output: SharedOutput::new(),
            primitives: Slot::empty("primitive buffer"),
            primitive_count: 0,
            camera: Slot::empty("camera buffer"),
            accumulation: Slot::empty("accumulation buffer"),
            scalars: ScalarArgBuffers::new(),
        }
    }

    /// Create every buffer for `scene` at the layout's resolution
    pub fn create_all(
        device: &wgpu::Device,
        layout: BufferLayout,
        scene: &SceneSnapshot,
    ) -> EngineResult<Self> {
        layout.check_limits(&device.limits())?;

        let mut buffers = Self::new(layout);
        buffers.create_shared_output(device)?;
        buffers.create_accumulation(device)?;
        buffers.create_scene_inputs(device, scene)?;
        buffers.scalars.create(device)?;

        log::info!(
            "[InteropBuffers::create_all] {}x{}: output {} KiB, accumulation {} KiB, {} primitive(s)",
            layout.width,
            layout.height,
            layout.output_bytes() / 1024,
            layout.accumulation_bytes() / 1024,
            buffers.primitive_count
        );
        Ok(buffers)
    }

    pub fn create_shared_output(&mut self, device: &wgpu::Device) -> EngineResult<()> {
        let size = self.layout.output_bytes();
        let buffer = capture_errors(device, || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Shared Output Buffer"),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        })
        .map_err(|e| EngineError::resource("output", e))?;
        self.output.buffer.fill(buffer)?;
        Ok(())
    }

    /// The accumulation buffer starts from zeroed host memory and is never
    /// cleared again for the lifetime of the buffer.
    pub fn create_accumulation(&mut self, device: &wgpu::Device) -> EngineResult<()> {
        let host = vec![AccumPixel::zeroed(); self.layout.accumulation_elements() as usize];
        let buffer = capture_errors(device, || {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Accumulation Buffer"),
                contents: bytemuck::cast_slice(&host),
                usage: wgpu::BufferUsages::STORAGE,
            })
        })
        .map_err(|e| EngineError::resource("accumulation", e))?;
        self.accumulation.fill(buffer)?;
        Ok(())
    }

    /// Upload camera and primitives once
    pub fn create_scene_inputs(&mut self, device: &wgpu::Device, scene: &SceneSnapshot) -> EngineResult<()> {
        let count = scene.primitive_count();
        if count > MAX_PRIMITIVES {
            return Err(EngineError::SceneCapacity {
                count,
                capacity: MAX_PRIMITIVES,
            });
        }

        // Fixed capacity, unused entries stay zeroed
        let mut spheres = vec![Sphere::zeroed(); MAX_PRIMITIVES];
        spheres[..count].copy_from_slice(scene.primitives());

        let primitives = capture_errors(device, || {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Primitive Buffer"),
                contents: bytemuck::cast_slice(&spheres),
                usage: wgpu::BufferUsages::STORAGE,
            })
        })
        .map_err(|e| EngineError::resource("primitive", e))?;

        let camera = capture_errors(device, || {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Camera Buffer"),
                contents: bytemuck::bytes_of(scene.camera()),
                usage: wgpu::BufferUsages::UNIFORM,
            })
        })
        .map_err(|e| EngineError::resource("camera", e))?;

        self.primitives.fill(primitives)?;
        self.camera.fill(camera)?;
        self.primitive_count = count as u32;
        Ok(())
    }

    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    pub fn output(&self) -> &SharedOutput {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut SharedOutput {
        &mut self.output
    }

    pub fn primitives(&self) -> EngineResult<&wgpu::Buffer> {
        self.primitives.require()
    }

    pub fn primitive_count(&self) -> u32 {
        self.primitive_count
    }

    pub fn camera(&self) -> EngineResult<&wgpu::Buffer> {
        self.camera.require()
    }

    pub fn accumulation(&self) -> EngineResult<&wgpu::Buffer> {
        self.accumulation.require()
    }

    pub fn scalars(&self) -> &ScalarArgBuffers {
        &self.scalars
    }

    /// Every buffer in release order: output, primitive, camera,
    /// accumulation, then the scalar argument uniforms
    pub fn slots_mut(&mut self) -> Vec<&mut dyn Releasable> {
        let mut slots: Vec<&mut dyn Releasable> = vec![
            &mut self.output,
            &mut self.primitives,
            &mut self.camera,
            &mut self.accumulation,
        ];
        slots.extend(self.scalars.slots_mut());
        slots
    }

    pub fn is_released(&self) -> bool {
        self.output.is_empty()
            && self.primitives.is_empty()
            && self.camera.is_empty()
            && self.accumulation.is_empty()
            && self.scalars.primitive_count.is_empty()
            && self.scalars.seed.is_empty()
            && self.scalars.frame_index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes_match_resolution() {
        let layout = BufferLayout::for_resolution(600, 600).expect("valid resolution");
        assert_eq!(layout.output_elements(), 360_000);
        assert_eq!(layout.accumulation_elements(), 360_000);
        assert_eq!(layout.output_bytes(), 360_000 * 4);
        assert_eq!(layout.accumulation_bytes(), 360_000 * 16);
        assert_eq!(layout.primitive_bytes(), 20 * 48);
        assert_eq!(layout.camera_bytes(), 48);
    }

    #[test]
    fn test_non_square_layout() {
        let layout = BufferLayout::for_resolution(800, 450).expect("valid resolution");
        assert_eq!(layout.pixel_count(), 800 * 450);
    }

    #[test]
    fn test_zero_resolution_is_rejected() {
        assert!(matches!(
            BufferLayout::for_resolution(0, 600),
            Err(EngineError::Config(_))
        ));
        assert!(BufferLayout::for_resolution(600, 0).is_err());
    }

    #[test]
    fn test_limits_name_the_buffer() {
        let layout = BufferLayout::for_resolution(4096, 4096).expect("valid resolution");
        let limits = wgpu::Limits {
            max_storage_buffer_binding_size: 1 << 20,
            ..wgpu::Limits::default()
        };
        match layout.check_limits(&limits) {
            Err(EngineError::Resource { buffer, .. }) => assert_eq!(buffer, "output"),
            other => panic!("expected resource error, got {other:?}"),
        }
        let small = BufferLayout::for_resolution(64, 64).expect("valid resolution");
        assert!(small.check_limits(&wgpu::Limits::default()).is_ok());
    }

    #[test]
    fn test_wrap_only_once_per_lifetime() {
        let mut wrap = WrapState::default();
        wrap.wrap().expect("first wrap");
        assert!(wrap.is_wrapped());
        assert!(wrap.wrap().is_err());
        wrap.reset();
        wrap.wrap().expect("wrap after recreate");
    }

    #[test]
    fn test_unwrapped_output_without_buffer() {
        let mut output = SharedOutput::new();
        assert!(output.wrap_for_compute().is_err());
        assert!(!output.is_wrapped());
        assert!(!output.release());
    }

    #[test]
    fn test_empty_buffers_release_as_noop() {
        let layout = BufferLayout::for_resolution(2, 2).expect("valid resolution");
        let mut buffers = InteropBuffers::new(layout);
        let slots = buffers.slots_mut();
        assert_eq!(slots.len(), 7);
        for slot in slots {
            assert!(slot.is_empty());
            assert!(!slot.release());
        }
    }

    #[test]
    fn test_accum_pixel_stride() {
        assert_eq!(std::mem::size_of::<AccumPixel>(), 16);
    }
}

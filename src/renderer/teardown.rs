//! Ordered release of GPU resources
//!
//! Handles are registered with the stage they belong to and released stage by
//! stage, never interleaved: display objects first, then kernels, buffers,
//! program, queue, context, device and finally the platform instance. Within a
//! stage, handles are released in registration order.

use crate::gpu::Releasable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReleaseStage {
    /// Window surface and present pipeline
    Display,
    /// Kernel set and the bind group built against it
    Kernels,
    /// Output, primitive, camera and accumulation buffers
    Buffers,
    Program,
    Queue,
    /// Logical device (the compute context)
    Context,
    /// Physical adapter
    Device,
    /// wgpu instance
    Platform,
}

impl ReleaseStage {
    pub const ORDER: [ReleaseStage; 8] = [
        ReleaseStage::Display,
        ReleaseStage::Kernels,
        ReleaseStage::Buffers,
        ReleaseStage::Program,
        ReleaseStage::Queue,
        ReleaseStage::Context,
        ReleaseStage::Device,
        ReleaseStage::Platform,
    ];
}

/// Handles collected for one teardown pass
#[derive(Default)]
pub struct TeardownSequence<'a> {
    entries: Vec<(ReleaseStage, &'a mut dyn Releasable)>,
}

impl<'a> TeardownSequence<'a> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, stage: ReleaseStage, handle: &'a mut dyn Releasable) -> &mut Self {
        self.entries.push((stage, handle));
        self
    }

    pub fn extend<I>(&mut self, stage: ReleaseStage, handles: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a mut dyn Releasable>,
    {
        self.entries.extend(handles.into_iter().map(|h| (stage, h)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release every registered handle in stage order
    pub fn run(mut self) -> TeardownReport {
        // Stable: registration order is kept inside a stage
        self.entries.sort_by_key(|(stage, _)| *stage);

        let mut report = TeardownReport::default();
        for (stage, handle) in self.entries {
            let label = handle.label();
            if handle.release() {
                log::debug!("[TeardownSequence::run] {:?}: released {}", stage, label);
                report.released.push((stage, label));
            } else {
                report.skipped += 1;
            }
        }

        if !report.released.is_empty() {
            log::info!(
                "[TeardownSequence::run] Released {} handle(s), {} already empty",
                report.released.len(),
                report.skipped
            );
        }
        report
    }
}

/// What a teardown pass actually released
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub released: Vec<(ReleaseStage, &'static str)>,
    pub skipped: usize,
}

impl TeardownReport {
    pub fn released_count(&self) -> usize {
        self.released.len()
    }

    /// True when nothing was live
    pub fn is_noop(&self) -> bool {
        self.released.is_empty()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.released.iter().map(|(_, label)| *label).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::Slot;

    #[test]
    fn test_stages_sort_in_release_order() {
        let mut sorted = ReleaseStage::ORDER;
        sorted.reverse();
        sorted.sort();
        assert_eq!(sorted, ReleaseStage::ORDER);
        assert!(ReleaseStage::Buffers < ReleaseStage::Program);
        assert!(ReleaseStage::Queue < ReleaseStage::Context);
    }

    #[test]
    fn test_registration_order_does_not_matter() {
        let mut device = Slot::new("device", ());
        let mut program = Slot::new("program", ());
        let mut output = Slot::new("output", ());
        let mut queue = Slot::new("queue", ());

        let mut sequence = TeardownSequence::new();
        sequence
            .push(ReleaseStage::Context, &mut device)
            .push(ReleaseStage::Queue, &mut queue)
            .push(ReleaseStage::Program, &mut program)
            .push(ReleaseStage::Buffers, &mut output);
        let report = sequence.run();

        assert_eq!(report.labels(), vec!["output", "program", "queue", "device"]);
    }

    #[test]
    fn test_empty_slots_are_skipped() {
        let mut live = Slot::new("camera", 1u8);
        let mut empty: Slot<u8> = Slot::empty("accumulation");
        let mut sequence = TeardownSequence::new();
        sequence.extend(ReleaseStage::Buffers, [&mut live as &mut dyn Releasable, &mut empty]);
        let report = sequence.run();
        assert_eq!(report.released_count(), 1);
        assert_eq!(report.skipped, 1);
    }
}

//! Kernel argument binding
//!
//! The path tracing kernel takes seven numbered arguments. Five of them are
//! fixed for the whole run and bound once; the seed and the frame index change
//! every frame. Both kinds of binding go through an [`ArgumentSink`], which the
//! GPU state implements on top of one bind group and a few uniform buffers.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::error::{EngineError, EngineResult, FrameStage, InitStage};

/// Fixed argument slots of the kernel, numbered as the kernel declares them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgSlot {
    Output,
    Primitives,
    PrimitiveCount,
    Camera,
    Seed,
    FrameIndex,
    Accumulation,
}

impl ArgSlot {
    pub const ALL: [ArgSlot; 7] = [
        ArgSlot::Output,
        ArgSlot::Primitives,
        ArgSlot::PrimitiveCount,
        ArgSlot::Camera,
        ArgSlot::Seed,
        ArgSlot::FrameIndex,
        ArgSlot::Accumulation,
    ];

    pub const STATIC: [ArgSlot; 5] = [
        ArgSlot::Output,
        ArgSlot::Primitives,
        ArgSlot::PrimitiveCount,
        ArgSlot::Camera,
        ArgSlot::Accumulation,
    ];

    pub const DYNAMIC: [ArgSlot; 2] = [ArgSlot::Seed, ArgSlot::FrameIndex];

    /// Binding index in the kernel
    pub fn index(self) -> u32 {
        match self {
            ArgSlot::Output => 0,
            ArgSlot::Primitives => 1,
            ArgSlot::PrimitiveCount => 2,
            ArgSlot::Camera => 3,
            ArgSlot::Seed => 4,
            ArgSlot::FrameIndex => 5,
            ArgSlot::Accumulation => 6,
        }
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, ArgSlot::Seed | ArgSlot::FrameIndex)
    }

    /// Whether `arg` has the type this slot is declared with
    pub fn accepts(self, arg: &KernelArg) -> bool {
        matches!(
            (self, arg),
            (ArgSlot::Output, KernelArg::Buffer(BufferRole::Output))
                | (ArgSlot::Primitives, KernelArg::Buffer(BufferRole::Primitives))
                | (ArgSlot::PrimitiveCount, KernelArg::I32(_))
                | (ArgSlot::Camera, KernelArg::Buffer(BufferRole::Camera))
                | (ArgSlot::Seed, KernelArg::U32(_))
                | (ArgSlot::FrameIndex, KernelArg::U64(_))
                | (ArgSlot::Accumulation, KernelArg::Buffer(BufferRole::Accumulation))
        )
    }
}

/// Which engine buffer a buffer argument refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Output,
    Primitives,
    Camera,
    Accumulation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArg {
    Buffer(BufferRole),
    I32(i32),
    U32(u32),
    U64(u64),
}

/// Receives argument values for one kernel
pub trait ArgumentSink {
    fn set_arg(&mut self, slot: ArgSlot, arg: KernelArg) -> EngineResult<()>;
}

/// Arguments that stay fixed for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticArgs {
    pub primitive_count: u32,
}

impl StaticArgs {
    pub fn bindings(&self) -> [(ArgSlot, KernelArg); 5] {
        [
            (ArgSlot::Output, KernelArg::Buffer(BufferRole::Output)),
            (ArgSlot::Primitives, KernelArg::Buffer(BufferRole::Primitives)),
            (ArgSlot::PrimitiveCount, KernelArg::I32(self.primitive_count as i32)),
            (ArgSlot::Camera, KernelArg::Buffer(BufferRole::Camera)),
            (ArgSlot::Accumulation, KernelArg::Buffer(BufferRole::Accumulation)),
        ]
    }
}

/// Arguments refreshed every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicArgs {
    pub seed: u32,
    pub frame_index: u64,
}

/// Per-frame seeds: a random session key mixed with the frame index.
///
/// The mix is a bijection on `u32`, so two frames whose indices differ in the
/// low 32 bits never share a seed.
#[derive(Debug, Clone, Copy)]
pub struct SeedSequence {
    key: u32,
}

impl SeedSequence {
    pub fn new(key: u32) -> Self {
        Self { key }
    }

    /// Fixed key for reproducible runs, random key otherwise
    pub fn from_config(seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(rng.next_u32())
    }

    pub fn seed_for(&self, frame_index: u64) -> u32 {
        mix32(frame_index as u32 ^ self.key)
    }
}

// lowbias32
fn mix32(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    x
}

pub struct KernelArgumentBinder {
    seeds: SeedSequence,
    static_args: Option<StaticArgs>,
    static_bind_count: u32,
    // Set after a complete dynamic bind, cleared by commit or failure
    dynamic: Option<DynamicArgs>,
    committed: u64,
}

impl KernelArgumentBinder {
    pub fn new(seeds: SeedSequence) -> Self {
        Self {
            seeds,
            static_args: None,
            static_bind_count: 0,
            dynamic: None,
            committed: 0,
        }
    }

    /// Bind the five static slots. Legal once per binder.
    pub fn bind_static<S: ArgumentSink + ?Sized>(&mut self, sink: &mut S, args: StaticArgs) -> EngineResult<()> {
        if self.static_args.is_some() {
            return Err(EngineError::init(InitStage::StaticBind, "static arguments are already bound"));
        }

        for (slot, arg) in args.bindings() {
            sink.set_arg(slot, arg).map_err(|e| {
                EngineError::init(
                    InitStage::StaticBind,
                    format!("slot {} ({:?}): {}", slot.index(), slot, e),
                )
            })?;
        }

        self.static_args = Some(args);
        self.static_bind_count += 1;
        log::info!(
            "[KernelArgumentBinder::bind_static] Bound {} static arguments ({} primitives)",
            ArgSlot::STATIC.len(),
            args.primitive_count
        );
        Ok(())
    }

    /// Bind seed and frame index for the next frame.
    ///
    /// All or nothing: if either slot fails, the frame has no trusted
    /// dynamic bindings and [`Self::ensure_dispatchable`] refuses it.
    pub fn bind_dynamic<S: ArgumentSink + ?Sized>(&mut self, sink: &mut S) -> EngineResult<DynamicArgs> {
        self.dynamic = None;

        let frame_index = self.next_frame();
        let args = DynamicArgs {
            seed: self.seeds.seed_for(frame_index),
            frame_index,
        };

        for (slot, arg) in [
            (ArgSlot::Seed, KernelArg::U32(args.seed)),
            (ArgSlot::FrameIndex, KernelArg::U64(args.frame_index)),
        ] {
            sink.set_arg(slot, arg)
                .map_err(|e| EngineError::frame(FrameStage::Binding, frame_index, format!("slot {}: {}", slot.index(), e)))?;
        }

        log::trace!(
            "[KernelArgumentBinder::bind_dynamic] frame {} seed {:#010x}",
            args.frame_index,
            args.seed
        );
        self.dynamic = Some(args);
        Ok(args)
    }

    /// Arguments the dispatch may trust, or an error naming what is missing
    pub fn ensure_dispatchable(&self) -> EngineResult<DynamicArgs> {
        let frame = self.next_frame();
        if self.static_args.is_none() {
            return Err(EngineError::frame(
                FrameStage::Dispatching,
                frame,
                "static arguments are not bound",
            ));
        }
        self.dynamic.ok_or_else(|| {
            EngineError::frame(
                FrameStage::Dispatching,
                frame,
                "dynamic arguments are missing or came from a failed bind",
            )
        })
    }

    /// Mark the bound frame as submitted. The next bind uses the following index.
    pub fn commit(&mut self) -> Option<u64> {
        let args = self.dynamic.take()?;
        self.committed = args.frame_index;
        Some(self.committed)
    }

    /// Drop the current dynamic bindings without committing them
    pub fn invalidate(&mut self) {
        self.dynamic = None;
    }

    /// Index of the last frame whose kernel was submitted
    pub fn committed_frame(&self) -> u64 {
        self.committed
    }

    /// Index the next dynamic bind will use; wraps at `u64::MAX`
    pub fn next_frame(&self) -> u64 {
        self.committed.wrapping_add(1)
    }

    pub fn static_args(&self) -> Option<StaticArgs> {
        self.static_args
    }

    pub fn static_bind_count(&self) -> u32 {
        self.static_bind_count
    }

    pub fn is_static_bound(&self) -> bool {
        self.static_args.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct RecordingSink {
        values: HashMap<u32, KernelArg>,
        fail_on: Option<ArgSlot>,
    }

    impl ArgumentSink for RecordingSink {
        fn set_arg(&mut self, slot: ArgSlot, arg: KernelArg) -> EngineResult<()> {
            if self.fail_on == Some(slot) {
                return Err(EngineError::Config("rejected".into()));
            }
            self.values.insert(slot.index(), arg);
            Ok(())
        }
    }

    #[test]
    fn test_slot_numbering() {
        let indices: Vec<u32> = ArgSlot::ALL.iter().map(|s| s.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6]);
        assert!(ArgSlot::DYNAMIC.iter().all(|s| s.is_dynamic()));
        assert!(ArgSlot::STATIC.iter().all(|s| !s.is_dynamic()));
    }

    #[test]
    fn test_slots_accept_only_their_type() {
        let args = StaticArgs { primitive_count: 3 };
        for (slot, arg) in args.bindings() {
            assert!(slot.accepts(&arg), "{:?}", slot);
        }
        assert!(ArgSlot::Seed.accepts(&KernelArg::U32(1)));
        assert!(ArgSlot::FrameIndex.accepts(&KernelArg::U64(1)));
        assert!(!ArgSlot::Seed.accepts(&KernelArg::U64(1)));
        assert!(!ArgSlot::Output.accepts(&KernelArg::Buffer(BufferRole::Accumulation)));
        assert!(!ArgSlot::PrimitiveCount.accepts(&KernelArg::U32(3)));
    }

    #[test]
    fn test_static_bind_once() {
        let mut sink = RecordingSink::default();
        let mut binder = KernelArgumentBinder::new(SeedSequence::new(1));
        binder
            .bind_static(&mut sink, StaticArgs { primitive_count: 12 })
            .expect("first static bind");
        assert_eq!(sink.values.get(&2), Some(&KernelArg::I32(12)));
        assert_eq!(sink.values.get(&6), Some(&KernelArg::Buffer(BufferRole::Accumulation)));

        let err = binder
            .bind_static(&mut sink, StaticArgs { primitive_count: 12 })
            .expect_err("second static bind");
        assert!(matches!(err, EngineError::Init { stage: InitStage::StaticBind, .. }));
        assert_eq!(binder.static_bind_count(), 1);
    }

    #[test]
    fn test_frame_index_follows_commits() {
        let mut sink = RecordingSink::default();
        let mut binder = KernelArgumentBinder::new(SeedSequence::new(7));
        binder.bind_static(&mut sink, StaticArgs { primitive_count: 1 }).expect("static");

        for expected in 1..=5u64 {
            let args = binder.bind_dynamic(&mut sink).expect("dynamic");
            assert_eq!(args.frame_index, expected);
            assert_eq!(binder.ensure_dispatchable().expect("dispatchable"), args);
            assert_eq!(binder.commit(), Some(expected));
        }
        // Rebinding without a commit reuses the same index
        assert_eq!(binder.bind_dynamic(&mut sink).expect("dynamic").frame_index, 6);
        assert_eq!(binder.bind_dynamic(&mut sink).expect("dynamic").frame_index, 6);
    }

    #[test]
    fn test_failed_dynamic_bind_blocks_dispatch() {
        let mut sink = RecordingSink::default();
        let mut binder = KernelArgumentBinder::new(SeedSequence::new(7));
        binder.bind_static(&mut sink, StaticArgs { primitive_count: 1 }).expect("static");

        sink.fail_on = Some(ArgSlot::FrameIndex);
        let err = binder.bind_dynamic(&mut sink).expect_err("frame index rejected");
        assert_eq!(err.frame_stage(), Some(FrameStage::Binding));
        assert!(binder.ensure_dispatchable().is_err());
        assert_eq!(binder.commit(), None);
        assert_eq!(binder.committed_frame(), 0);
    }

    #[test]
    fn test_dispatch_requires_static_bind() {
        let mut sink = RecordingSink::default();
        let mut binder = KernelArgumentBinder::new(SeedSequence::new(7));
        binder.bind_dynamic(&mut sink).expect("dynamic");
        assert!(binder.ensure_dispatchable().is_err());
    }

    #[test]
    fn test_seeds_differ_between_frames() {
        let seeds = SeedSequence::from_config(Some(42));
        let distinct: HashSet<u32> = (1..=10_000u64).map(|f| seeds.seed_for(f)).collect();
        assert_eq!(distinct.len(), 10_000);
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let a = SeedSequence::from_config(Some(9));
        let b = SeedSequence::from_config(Some(9));
        assert_eq!(a.seed_for(3), b.seed_for(3));
    }

    #[test]
    fn test_frame_index_wraps() {
        let mut binder = KernelArgumentBinder::new(SeedSequence::new(0));
        binder.committed = u64::MAX;
        assert_eq!(binder.next_frame(), 0);
    }
}

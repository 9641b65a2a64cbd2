//! Ownership of the pixel buffer shared by compute and display
//!
//! The buffer is written by the compute kernel and read by the display
//! pipeline, never both at once. Ownership moves only through
//! [`SharedSurface::begin_acquire`] / [`SharedSurface::finish_acquire`] and
//! [`SharedSurface::begin_release`] / [`SharedSurface::finish_release`]; any
//! other order is rejected.

use crate::error::{EngineError, EngineResult, FrameStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Safe to present, unsafe to write
    DisplayOwned,
    /// Safe for kernel writes, unsafe to present
    ComputeOwned,
    /// An acquire or release call is in flight
    InTransition,
}

#[derive(Debug)]
pub struct SharedSurface {
    state: Ownership,
    // Direction of the transition in flight
    acquiring: bool,
    acquires: u64,
    releases: u64,
}

impl SharedSurface {
    pub fn new() -> Self {
        Self {
            state: Ownership::DisplayOwned,
            acquiring: false,
            acquires: 0,
            releases: 0,
        }
    }

    pub fn state(&self) -> Ownership {
        self.state
    }

    pub fn is_display_owned(&self) -> bool {
        self.state == Ownership::DisplayOwned
    }

    pub fn is_compute_owned(&self) -> bool {
        self.state == Ownership::ComputeOwned
    }

    /// Completed acquires
    pub fn acquire_count(&self) -> u64 {
        self.acquires
    }

    /// Completed releases
    pub fn release_count(&self) -> u64 {
        self.releases
    }

    /// Start moving ownership to compute. Only legal from `DisplayOwned`.
    pub fn begin_acquire(&mut self, frame: u64) -> EngineResult<()> {
        if self.state != Ownership::DisplayOwned {
            return Err(EngineError::frame(
                FrameStage::Acquiring,
                frame,
                format!("shared surface is {:?}, expected DisplayOwned", self.state),
            ));
        }
        self.state = Ownership::InTransition;
        self.acquiring = true;
        Ok(())
    }

    /// Finish an acquire. A failed acquire leaves the display as owner.
    pub fn finish_acquire(&mut self, succeeded: bool) {
        debug_assert!(self.state == Ownership::InTransition && self.acquiring);
        if succeeded {
            self.state = Ownership::ComputeOwned;
            self.acquires += 1;
        } else {
            self.state = Ownership::DisplayOwned;
        }
        self.acquiring = false;
    }

    /// Start moving ownership back to display. Only legal from `ComputeOwned`.
    pub fn begin_release(&mut self, frame: u64) -> EngineResult<()> {
        if self.state != Ownership::ComputeOwned {
            return Err(EngineError::frame(
                FrameStage::Releasing,
                frame,
                format!("shared surface is {:?}, expected ComputeOwned", self.state),
            ));
        }
        self.state = Ownership::InTransition;
        Ok(())
    }

    /// Finish a release. A failed release leaves compute as owner so the
    /// release can be retried before the next acquire.
    pub fn finish_release(&mut self, succeeded: bool) {
        debug_assert!(self.state == Ownership::InTransition && !self.acquiring);
        if succeeded {
            self.state = Ownership::DisplayOwned;
            self.releases += 1;
        } else {
            self.state = Ownership::ComputeOwned;
        }
    }
}

impl Default for SharedSurface {
    fn default() -> Self {
        Self::new()
    }
}

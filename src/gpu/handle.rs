//! Owned GPU handle slots
//!
//! Every native object (instance, adapter, device, queue, program, buffer)
//! lives in a [`Slot`]. A slot has a single owner, can be filled once, and
//! releases its object by dropping it. Releasing an empty slot is a no-op, so
//! teardown can run any number of times and on any early-return path.

use crate::error::{EngineError, EngineResult, InitStage};

/// Something that can be released exactly once
pub trait Releasable {
    /// Release the held object. Returns `false` when there was nothing to release.
    fn release(&mut self) -> bool;

    /// True when no live object is held
    fn is_empty(&self) -> bool;

    fn label(&self) -> &'static str;
}

/// Single-owner wrapper around an optional native handle
pub struct Slot<T> {
    label: &'static str,
    value: Option<T>,
}

impl<T> Slot<T> {
    pub const fn empty(label: &'static str) -> Self {
        Self { label, value: None }
    }

    pub fn new(label: &'static str, value: T) -> Self {
        Self {
            label,
            value: Some(value),
        }
    }

    /// Store a freshly created object. Refuses to alias a live one.
    pub fn fill(&mut self, value: T) -> EngineResult<&T> {
        if self.value.is_some() {
            return Err(EngineError::init(
                InitStage::Device,
                format!("{} is already live; release it before creating another", self.label),
            ));
        }
        Ok(self.value.insert(value))
    }

    /// Build a replacement and swap it in only when the build succeeds.
    ///
    /// On failure the current object stays in place untouched.
    pub fn replace_with<F>(&mut self, build: F) -> EngineResult<&T>
    where
        F: FnOnce(Option<&T>) -> EngineResult<T>,
    {
        let next = build(self.value.as_ref())?;
        if self.value.is_some() {
            log::debug!("[Slot::replace_with] Replacing live {}", self.label);
        }
        Ok(self.value.insert(next))
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }

    /// Borrow the object or report which handle is missing
    pub fn require(&self) -> EngineResult<&T> {
        self.value.as_ref().ok_or_else(|| {
            EngineError::init(InitStage::Device, format!("{} has not been created", self.label))
        })
    }

    pub fn take(&mut self) -> Option<T> {
        self.value.take()
    }
}

impl<T> Releasable for Slot<T> {
    fn release(&mut self) -> bool {
        match self.value.take() {
            Some(value) => {
                drop(value);
                log::debug!("[Slot::release] Released {}", self.label);
                true
            }
            None => false,
        }
    }

    fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

impl<T> std::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("label", &self.label)
            .field("live", &self.value.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_twice_is_noop() {
        let mut slot = Slot::new("queue", 7u32);
        assert!(slot.release());
        assert!(!slot.release());
        assert!(slot.is_empty());
    }

    #[test]
    fn test_release_before_create_is_noop() {
        let mut slot: Slot<u32> = Slot::empty("context");
        assert!(!slot.release());
        assert!(slot.require().is_err());
    }

    #[test]
    fn test_fill_refuses_live_alias() {
        let mut slot = Slot::empty("device");
        slot.fill(1u8).expect("first fill succeeds");
        assert!(slot.fill(2u8).is_err());
        assert_eq!(slot.get(), Some(&1));
    }

    #[test]
    fn test_replace_with_keeps_old_value_on_failure() {
        let mut slot = Slot::new("program", "v1".to_string());
        let result = slot.replace_with(|_| Err(EngineError::Build { log: "syntax".into() }));
        assert!(result.is_err());
        assert_eq!(slot.get().map(String::as_str), Some("v1"));

        slot.replace_with(|old| Ok(format!("{}+v2", old.map(String::as_str).unwrap_or(""))))
            .expect("replacement succeeds");
        assert_eq!(slot.get().map(String::as_str), Some("v1+v2"));
    }
}

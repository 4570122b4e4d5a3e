//! Set of units with unflushed changes

use crate::core::types::UnitId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Dirty unit accumulator
///
/// Marks are idempotent. `drain` swaps the whole set out under the lock, so a
/// mark racing with a drain lands either in the drained batch or in the next
/// one, never in both and never nowhere.
#[derive(Debug, Default)]
pub struct DirtyUnitSet {
    units: Mutex<HashSet<UnitId>>,
    closed: AtomicBool,
}

impl DirtyUnitSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `unit` has unflushed changes; ignored once closed
    pub fn mark_dirty(&self, unit: UnitId) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.units.lock().insert(unit)
    }

    /// Take every dirty unit, leaving the set empty
    pub fn drain(&self) -> HashSet<UnitId> {
        std::mem::take(&mut *self.units.lock())
    }

    /// Put back units a failed flush could not write
    pub fn restore(&self, units: impl IntoIterator<Item = UnitId>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.units.lock().extend(units);
    }

    /// Forget everything and ignore further marks
    pub fn collection_deleted(&self) {
        self.closed.store(true, Ordering::Release);
        self.units.lock().clear();
    }

    /// Whether the set has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether `unit` is currently dirty
    pub fn is_dirty(&self, unit: UnitId) -> bool {
        self.units.lock().contains(&unit)
    }

    /// Number of dirty units
    pub fn len(&self) -> usize {
        self.units.lock().len()
    }

    /// Whether no unit is dirty
    pub fn is_empty(&self) -> bool {
        self.units.lock().is_empty()
    }

    /// Copy of the current set
    pub fn snapshot(&self) -> HashSet<UnitId> {
        self.units.lock().clone()
    }
}

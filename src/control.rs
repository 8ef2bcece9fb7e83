use std::sync::atomic::{AtomicUsize, Ordering, fence};

/// Shared reference counter for one managed object.
/// The count equals the number of live `SharedHandle`s referencing the same
/// allocation; the handle whose decrement reaches zero frees the object and
/// this block together, exactly once.
///
/// Memory ordering: increments are `Relaxed` because a new reference is always
/// derived from an existing live reference held by the incrementing thread.
/// Decrements are `Release`, paired with an `Acquire` fence taken only by the
/// thread that observes the count hit zero, so every use of the object
/// happens-before its destruction.
#[derive(Debug)]
pub struct ControlBlock {
    count: AtomicUsize,
}

impl ControlBlock {
    pub fn new(count: usize) -> ControlBlock {
        Self {
            count: AtomicUsize::new(count),
        }
    }

    /// Adds one owner and returns the new count.
    pub fn increment(&self) -> usize {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Removes one owner; returns true iff this call dropped the count to
    /// zero. The check is part of the same atomic RMW as the decrement, so
    /// two racing callers can never both see zero.
    pub fn decrement_and_check_zero(&self) -> bool {
        let previous = self.count.fetch_sub(1, Ordering::Release);
        assert!(previous != 0, "reference count underflow");
        if previous == 1 {
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Snapshot of the count. Stale as soon as it returns if other owners are
    /// racing; diagnostics only, never an ownership decision.
    pub fn current(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

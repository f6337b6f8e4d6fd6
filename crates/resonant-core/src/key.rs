#![forbid(unsafe_code)]

//! Stable identity keys for observable objects.
//!
//! An [`ItemKey`] is handed out once, when an object is first bound to a
//! store, and never changes for the lifetime of that object. Keys come from a
//! per-store monotonically increasing counter ([`KeyAllocator`]), so two live
//! objects in one store never share a key.

use std::cell::Cell;
use std::fmt;

/// Identity handle for an observable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey(u64);

impl ItemKey {
    /// Create a key from a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic key source. Ids start at 1.
#[derive(Debug)]
pub struct KeyAllocator {
    next: Cell<u64>,
}

impl KeyAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self { next: Cell::new(1) }
    }

    /// Allocate the next key.
    pub fn allocate(&self) -> ItemKey {
        let id = self.next.get();
        self.next.set(id + 1);
        ItemKey(id)
    }

    /// Number of keys handed out so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next.get() - 1
    }
}

impl Default for KeyAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_monotonic() {
        let keys = KeyAllocator::new();
        let a = keys.allocate();
        let b = keys.allocate();
        assert_eq!(a.raw(), 1);
        assert_eq!(b.raw(), 2);
        assert!(a < b);
        assert_eq!(keys.issued(), 2);
    }

    #[test]
    fn display_is_decimal() {
        assert_eq!(ItemKey::new(42).to_string(), "42");
    }
}

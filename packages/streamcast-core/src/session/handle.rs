//! Session handle identity.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Opaque identifier for one session.
///
/// Issued by an `AtomicU64` counter on the owning transport. A fresh
/// handshake - even one that re-establishes a session to the same peer -
/// always gets a new handle; handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(u64);

impl SessionHandle {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Issues fresh, never-reused [`SessionHandle`]s.
#[derive(Debug, Default)]
pub struct SessionHandleAllocator {
    next: AtomicU64,
}

impl SessionHandleAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    /// Allocates the next handle in sequence.
    pub fn allocate(&self) -> SessionHandle {
        SessionHandle(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_never_repeats() {
        let allocator = SessionHandleAllocator::new();
        let a = allocator.allocate();
        let b = allocator.allocate();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }
}

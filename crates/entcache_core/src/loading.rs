//! Loading scope.
//!
//! While a manager is loading (linking relationships, merging query or save
//! results, importing), property writes are side effects of the cache itself
//! rather than user edits, so they must not promote `Unchanged` entities to
//! `Modified`. Operations nest, so the scope is a counter, and every
//! [`LoadingGuard`] releases its level on drop, including during unwinding.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counting, reentrant loading flag.
#[derive(Debug, Default)]
pub struct LoadingScope {
    depth: AtomicUsize,
}

impl LoadingScope {
    /// Creates an inactive scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters the scope; it stays active until the guard is dropped.
    #[must_use = "the loading scope ends when the guard is dropped"]
    pub fn enter(&self) -> LoadingGuard<'_> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        LoadingGuard { scope: self }
    }

    /// Returns true while at least one guard is alive.
    pub fn is_loading(&self) -> bool {
        self.depth() > 0
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// Keeps a [`LoadingScope`] active.
#[derive(Debug)]
pub struct LoadingGuard<'a> {
    scope: &'a LoadingScope,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.scope.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

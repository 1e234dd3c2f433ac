//! Deferred per-frame cleanup
//!
//! Most objects release their handles in `Drop`. Transient resources whose last use is inside
//! a submitted frame cannot be dropped at the point the CPU stops needing them; they are parked
//! in the frame slot's [`DeletionQueue`] and released once that slot's fence has signaled.

/// LIFO stack of deferred cleanup actions
#[derive(Default)]
pub struct DeletionQueue {
    actions: Vec<Box<dyn FnOnce()>>,
}

impl DeletionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer an arbitrary cleanup action
    pub fn push(&mut self, action: impl FnOnce() + 'static) {
        self.actions.push(Box::new(action));
    }

    /// Keep `value` alive until the next flush, then drop it
    pub fn defer_drop<T: 'static>(&mut self, value: T) {
        self.push(move || drop(value));
    }

    /// Number of pending actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every pending action, most recently pushed first
    pub fn flush(&mut self) {
        let count = self.actions.len();
        while let Some(action) = self.actions.pop() {
            action();
        }
        if count > 0 {
            log::trace!("Flushed {count} deferred deletions");
        }
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        self.flush();
    }
}

impl std::fmt::Debug for DeletionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("pending", &self.actions.len())
            .finish()
    }
}

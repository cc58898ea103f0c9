use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of operations a store has running. Each operation holds a
/// [`LoadingGuard`]; the store is loading while any guard is alive.
#[derive(Debug, Default)]
pub struct Loading(AtomicUsize);

impl Loading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }

    pub fn start(&self) -> LoadingGuard<'_> {
        self.0.fetch_add(1, Ordering::SeqCst);
        LoadingGuard(&self.0)
    }
}

/// Releases its slot on drop, including when the owning future is cancelled.
#[derive(Debug)]
pub struct LoadingGuard<'a>(&'a AtomicUsize);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

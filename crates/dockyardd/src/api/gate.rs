//! One-shot synchronisation between daemon initialisation and the API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Set by the daemon once its commands are installed.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    /// Builds an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the daemon ready. There is no way back.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Whether [`Readiness::mark_ready`] has been called.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Holds listeners back from accepting until opened.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    open: AtomicBool,
    activations: AtomicUsize,
}

impl Gate {
    /// Opens the gate; returns `false` when it was already open.
    pub(crate) fn open(&self) -> bool {
        let opened = !self.open.swap(true, Ordering::AcqRel);
        if opened {
            self.activations.fetch_add(1, Ordering::AcqRel);
        }
        opened
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn activations(&self) -> usize {
        self.activations.load(Ordering::Acquire)
    }
}

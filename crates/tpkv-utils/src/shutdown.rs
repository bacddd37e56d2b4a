use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;

/// One-way flag raised when the process starts shutting down.
pub struct ShutdownFlag(AtomicBool);

impl ShutdownFlag {
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    #[inline]
    pub fn raise(&self) {
        self.0.store(true, SeqCst);
    }

    #[inline]
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(SeqCst)
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

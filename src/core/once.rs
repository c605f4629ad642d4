//! One-shot flags used to make release and completion paths idempotent.
use std::sync::atomic::{AtomicBool, Ordering};

/// A flag that can be claimed exactly once, from any thread.
///
/// [`OnceFlag::claim`] returns `true` only for the first caller; every later
/// call observes the flag as already taken and returns `false`.
#[derive(Debug, Default)]
pub struct OnceFlag {
    taken: AtomicBool,
}

impl OnceFlag {
    pub const fn new() -> Self {
        Self {
            taken: AtomicBool::new(false),
        }
    }

    /// Claim the flag. Returns `true` if this call performed the transition.
    pub fn claim(&self) -> bool {
        self.taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the flag has already been claimed.
    pub fn is_claimed(&self) -> bool {
        self.taken.load(Ordering::Acquire)
    }
}

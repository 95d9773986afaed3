//! GPU progress sources

use std::sync::atomic::{AtomicU32, Ordering};

use super::token::CompletionToken;

/// Read side of the GPU completion fence
///
/// Backed in hardware by a status register or memory-mapped fence that the
/// GPU writes at the end of each submission.
pub trait GpuProgress: Send + Sync {
    /// Latest token the GPU has finished
    fn completed(&self) -> CompletionToken;
}

/// Host-memory fence, written by whoever observes GPU completion
///
/// Used by software backends and tests to simulate the GPU.
#[derive(Debug, Default)]
pub struct FenceProgress {
    value: AtomicU32,
}

impl FenceProgress {
    pub fn new() -> Self {
        FenceProgress {
            value: AtomicU32::new(CompletionToken::NONE.value()),
        }
    }

    /// Fence that has already observed `token`
    pub fn starting_at(token: CompletionToken) -> Self {
        FenceProgress {
            value: AtomicU32::new(token.value()),
        }
    }

    /// Record that all work up to and including `token` has finished
    ///
    /// The fence never moves backwards.
    pub fn signal(&self, token: CompletionToken) {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            if !token.is_after(CompletionToken::from_raw(current)) {
                return;
            }
            match self.value.compare_exchange_weak(
                current,
                token.value(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl GpuProgress for FenceProgress {
    fn completed(&self) -> CompletionToken {
        CompletionToken::from_raw(self.value.load(Ordering::Acquire))
    }
}

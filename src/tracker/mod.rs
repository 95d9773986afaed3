//! GPU completion tracking
//!
//! The CPU stamps every submission with a [`CompletionToken`]; the GPU
//! writes the token of the last finished submission to a fence the CPU can
//! read. A token is retired once the fence value has reached it.

pub mod fence;
pub mod token;

pub use fence::{FenceProgress, GpuProgress};
pub use token::CompletionToken;

use std::sync::Arc;

/// Issues tokens and answers "has this one finished yet?"
///
/// Owned by the render context; the GPU side is only ever read.
pub struct CompletionTracker {
    progress: Arc<dyn GpuProgress>,
    next: CompletionToken,
    issued: u64,
}

impl std::fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("next", &self.next)
            .field("completed", &self.progress.completed())
            .field("issued", &self.issued)
            .finish()
    }
}

impl CompletionTracker {
    /// Start issuing right after whatever the fence already reports
    pub fn new(progress: Arc<dyn GpuProgress>) -> Self {
        let next = progress.completed().successor();
        CompletionTracker {
            progress,
            next,
            issued: 0,
        }
    }

    /// Hand out the next token
    pub fn issue(&mut self) -> CompletionToken {
        let token = self.next;
        self.next = token.successor();
        self.issued += 1;
        tracing::trace!(token = token.value(), "completion token issued");
        token
    }

    /// Token the next `issue()` will return
    pub fn next_token(&self) -> CompletionToken {
        self.next
    }

    /// Latest token the GPU reports as finished
    pub fn latest_completed(&self) -> CompletionToken {
        self.progress.completed()
    }

    /// True once the GPU has finished the work stamped with `token`
    pub fn is_retired(&self, token: CompletionToken) -> bool {
        !token.is_after(self.progress.completed())
    }

    /// Tokens issued but not yet retired
    pub fn in_flight(&self) -> u32 {
        let completed = self.progress.completed();
        let last_issued = self.next.predecessor();
        if last_issued.is_after(completed) {
            last_issued.distance_from(completed)
        } else {
            0
        }
    }

    /// Total tokens issued over the tracker's lifetime
    pub fn issued_count(&self) -> u64 {
        self.issued
    }
}

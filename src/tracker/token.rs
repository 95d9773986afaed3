//! Completion token ordering

use serde::{Deserialize, Serialize};

/// Monotonic submission stamp
///
/// Ordering uses serial-number arithmetic on the 32-bit value: `a` is after
/// `b` when the wrapping difference `a - b`, read as signed, is positive. This
/// stays correct across the `u32::MAX -> 0` wrap as long as the tokens being
/// compared are less than 2^31 issues apart. The value 0 is never issued; it
/// is the fence value before any work has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CompletionToken(u32);

impl CompletionToken {
    /// Fence value before any submission completes
    pub const NONE: CompletionToken = CompletionToken(0);

    /// First token a fresh tracker issues
    pub const FIRST: CompletionToken = CompletionToken(1);

    pub fn from_raw(value: u32) -> Self {
        CompletionToken(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// True if `self` was issued later than `other`
    pub fn is_after(&self, other: CompletionToken) -> bool {
        (self.0.wrapping_sub(other.0) as i32) > 0
    }

    /// Number of issues between `other` and `self`, assuming `self` is after
    pub fn distance_from(&self, other: CompletionToken) -> u32 {
        self.0.wrapping_sub(other.0)
    }

    /// Next token, skipping the reserved zero value on wrap
    pub fn successor(&self) -> CompletionToken {
        match self.0.wrapping_add(1) {
            0 => CompletionToken(1),
            value => CompletionToken(value),
        }
    }

    pub fn predecessor(&self) -> CompletionToken {
        match self.0.wrapping_sub(1) {
            0 => CompletionToken(u32::MAX),
            value => CompletionToken(value),
        }
    }

    /// Later of two tokens
    pub fn latest(self, other: CompletionToken) -> CompletionToken {
        if other.is_after(self) {
            other
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_after_plain() {
        let a = CompletionToken::from_raw(10);
        let b = CompletionToken::from_raw(11);
        assert!(b.is_after(a));
        assert!(!a.is_after(b));
        assert!(!a.is_after(a));
    }

    #[test]
    fn test_is_after_across_wrap() {
        let high = CompletionToken::from_raw(u32::MAX - 2);
        let low = CompletionToken::from_raw(3);
        assert!(low.is_after(high));
        assert!(!high.is_after(low));
        assert_eq!(low.distance_from(high), 6);
    }

    #[test]
    fn test_successor_skips_zero() {
        assert_eq!(
            CompletionToken::from_raw(u32::MAX).successor(),
            CompletionToken::FIRST
        );
        assert_eq!(
            CompletionToken::FIRST.predecessor(),
            CompletionToken::from_raw(u32::MAX)
        );
        assert_eq!(CompletionToken::from_raw(5).successor().value(), 6);
    }

    #[test]
    fn test_latest() {
        let a = CompletionToken::from_raw(4);
        let b = CompletionToken::from_raw(9);
        assert_eq!(a.latest(b), b);
        assert_eq!(b.latest(a), b);
    }
}

//! Core types for the coalesced hash table

use thiserror::Error;

/// Number of buckets; fixed for the lifetime of a table
pub const BUCKET_COUNT: usize = 256;

/// Position of an entry in the flat entry array
///
/// Slot 0 is reserved and never handed out, so a valid index is always
/// non-zero. Chains still use `Option<EntryIndex>` for "no next".
pub type EntryIndex = u16;

/// Errors that can occur during hash table operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashTableError {
    #[error("hash table full at {capacity} entries")]
    OutOfSpace { capacity: u16 },
    #[error("hash table allocation failed: {0}")]
    OutOfMemory(String),
    #[error("invalid hash table capacity: initial {initial}, max {max}")]
    InvalidCapacity { initial: u16, max: u16 },
}

/// Lookup key: kernel unique id plus cache (variant) id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub unique_id: i32,
    pub cache_id: i32,
}

impl HashKey {
    pub fn new(unique_id: i32, cache_id: i32) -> Self {
        HashKey {
            unique_id,
            cache_id,
        }
    }

    /// A negative cache id matches any entry with the same unique id
    pub fn is_wildcard(&self) -> bool {
        self.cache_id < 0
    }

    /// Matching rule shared by `search` and `unregister`
    pub fn matches(&self, stored: &HashKey) -> bool {
        stored.unique_id == self.unique_id
            && (self.is_wildcard() || stored.cache_id == self.cache_id)
    }
}

/// Fold a unique id into one of the 256 buckets
///
/// The upper and lower halves are folded into 16 bits, then the two bytes of
/// that value are folded into 8 bits.
pub fn bucket_of(unique_id: i32) -> usize {
    let id = unique_id as u32;
    let h = ((id >> 16) ^ id) & 0xFFFF;
    (((h >> 8) ^ h) & 0xFF) as usize
}

/// Restartable search position
///
/// Start with [`SearchCursor::new`]; after each hit the cursor remembers the
/// matching entry so the next call continues down the same chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchCursor {
    /// Fresh search: recompute the bucket
    #[default]
    Start,
    /// Continue after this entry
    After(EntryIndex),
    /// Chain walked to the end
    Exhausted,
}

impl SearchCursor {
    pub fn new() -> Self {
        SearchCursor::Start
    }

    /// Resume from a raw index; `0` means a fresh search
    pub fn from_index(index: EntryIndex) -> Self {
        if index == 0 {
            SearchCursor::Start
        } else {
            SearchCursor::After(index)
        }
    }

    /// Raw index form; `0` for a fresh or finished search
    pub fn index(&self) -> EntryIndex {
        match self {
            SearchCursor::After(index) => *index,
            _ => 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, SearchCursor::Exhausted)
    }
}

/// Table occupancy snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashTableStats {
    /// Entry slots, including the reserved slot 0
    pub capacity: usize,
    pub registered: usize,
    pub free: usize,
    pub extend_count: usize,
    /// Longest bucket chain
    pub longest_chain: usize,
    /// Buckets with at least one entry
    pub used_buckets: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_fold() {
        assert_eq!(bucket_of(0), 0);
        assert_eq!(bucket_of(1), 1);
        assert_eq!(bucket_of(0x0101), 0);
        // 0x12345678 -> 0x1234 ^ 0x5678 = 0x444C -> 0x44 ^ 0x4C = 0x08
        assert_eq!(bucket_of(0x1234_5678), 0x08);
        assert_eq!(bucket_of(0x0001_0000), 1);
        assert!(bucket_of(-1) < BUCKET_COUNT);
    }

    #[test]
    fn test_wildcard_matching() {
        let stored = HashKey::new(5, 2);
        assert!(HashKey::new(5, 2).matches(&stored));
        assert!(HashKey::new(5, -1).matches(&stored));
        assert!(!HashKey::new(5, 1).matches(&stored));
        assert!(!HashKey::new(6, -1).matches(&stored));
    }

    #[test]
    fn test_cursor_index_round_trip() {
        assert_eq!(SearchCursor::from_index(0), SearchCursor::Start);
        assert_eq!(SearchCursor::from_index(7), SearchCursor::After(7));
        assert_eq!(SearchCursor::After(7).index(), 7);
        assert_eq!(SearchCursor::Exhausted.index(), 0);
        assert!(SearchCursor::Exhausted.is_exhausted());
    }
}

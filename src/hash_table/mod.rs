//! Coalesced hash index for resident kernels
//!
//! Maps a `(unique_id, cache_id)` pair to a small `Copy` payload (the
//! registry stores allocation handles). All entries live in one flat array;
//! bucket chains and the free list are threaded through the same `next`
//! field, so growing the table never moves an entry.

pub mod table;
pub mod types;

pub use table::CoalescedHashTable;
pub use types::{bucket_of, EntryIndex, HashKey, HashTableError, HashTableStats, SearchCursor, BUCKET_COUNT};

//! renderheap - render-engine state heap
//!
//! Kernel residency caching and media-state pooling for a GPU render/media
//! engine. Compiled kernels live in an instruction heap indexed by a
//! coalesced hash table; memory is only reused once the GPU has retired the
//! work that referenced it.

#![allow(clippy::new_without_default)] // Constructors take explicit sizing
#![allow(clippy::len_without_is_empty)] // Pool sizes are not collections
#![allow(clippy::collapsible_else_if)] // Sometimes clearer for control flow
#![allow(clippy::let_and_return)] // Sometimes clearer for debugging

pub mod config;
pub mod error;
pub mod hash_table;
pub mod heap;
pub mod kernel;
pub mod list;
pub mod logging;
pub mod media_state;
pub mod state_heap;
pub mod tracker;

pub use config::{HeapMode, HeapPreset, StateHeapConfig};
pub use error::{ErrorCategory, HeapResult, RenderHeapError};
pub use hash_table::{CoalescedHashTable, HashTableError, SearchCursor};
pub use heap::{HeapBlock, HeapManager, HeapMemory, HostHeapMemory};
pub use kernel::{
    KernelAllocId, KernelAllocation, KernelAllocationRegistry, KernelBinary, KernelBinding,
    KernelState, UnloadOutcome,
};
pub use media_state::{ComponentId, MediaStateId, MediaStatePool};
pub use state_heap::{StateHeap, StateHeapStats, SyncSummary};
pub use tracker::{CompletionToken, CompletionTracker, FenceProgress, GpuProgress};

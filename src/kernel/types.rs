//! Core types for kernel residency tracking

use serde::{Deserialize, Serialize};

use crate::heap::HeapBlock;
use crate::list::{Linked, Links};
use crate::tracker::CompletionToken;

/// Handle to a kernel allocation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelAllocId(pub(crate) u32);

impl KernelAllocId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A kernel handle together with the key it was registered under
///
/// Binding tables hold these so a record that was unloaded and reused for
/// another kernel is not mistaken for the one that was bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelBinding {
    pub id: KernelAllocId,
    pub unique_id: i32,
    pub cache_id: i32,
}

/// Residency state of a kernel allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KernelState {
    /// Record is in the pool, not registered
    #[default]
    Free,
    /// Resident and usable
    Used,
    /// Resident and pinned; never evicted
    Locked,
    /// Evicted; record kept until unloaded
    Removed,
    /// Memory reserved, binary not yet written
    Loading,
    /// Registered but its memory was reclaimed; reload before use
    Stale,
}

impl KernelState {
    /// Memory is reserved for the binary
    pub fn is_resident(&self) -> bool {
        matches!(self, KernelState::Used | KernelState::Locked | KernelState::Loading)
    }

    /// Ready for GPU use
    pub fn is_usable(&self) -> bool {
        matches!(self, KernelState::Used | KernelState::Locked)
    }
}

/// Which registry list holds a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelList {
    Pool,
    Allocated,
    Submitted,
}

/// Kernel binary handed in by the codec/VP layer
#[derive(Debug, Clone, Copy)]
pub struct KernelBinary<'a> {
    pub unique_id: i32,
    pub cache_id: i32,
    pub bytes: &'a [u8],
}

impl<'a> KernelBinary<'a> {
    pub fn new(unique_id: i32, cache_id: i32, bytes: &'a [u8]) -> Self {
        KernelBinary {
            unique_id,
            cache_id,
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// One kernel binary resident (or formerly resident) in the instruction heap
#[derive(Debug, Clone, Default)]
pub struct KernelAllocation {
    pub(crate) unique_id: i32,
    pub(crate) cache_id: i32,
    pub(crate) size: usize,
    pub(crate) block: Option<HeapBlock>,
    pub(crate) sync: Option<CompletionToken>,
    /// Recency stamp from the registry clock
    pub(crate) access_count: u64,
    /// Number of submissions that referenced this kernel
    pub(crate) use_count: u64,
    pub(crate) state: KernelState,
    /// Unload requested while GPU work was in flight
    pub(crate) pending_unload: bool,
    pub(crate) links: Links<KernelList>,
}

impl KernelAllocation {
    pub fn unique_id(&self) -> i32 {
        self.unique_id
    }

    pub fn cache_id(&self) -> i32 {
        self.cache_id
    }

    /// Byte offset into the instruction heap, if resident
    pub fn offset(&self) -> Option<usize> {
        self.block.map(|b| b.offset)
    }

    /// Binary size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn block(&self) -> Option<HeapBlock> {
        self.block
    }

    /// Token of the most recent submission referencing this kernel
    pub fn sync_token(&self) -> Option<CompletionToken> {
        self.sync
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    pub fn list(&self) -> Option<KernelList> {
        self.links.owner()
    }

    pub fn is_pending_unload(&self) -> bool {
        self.pending_unload
    }

    pub(crate) fn clear(&mut self) {
        self.unique_id = -1;
        self.cache_id = -1;
        self.size = 0;
        self.block = None;
        self.sync = None;
        self.access_count = 0;
        self.use_count = 0;
        self.state = KernelState::Free;
        self.pending_unload = false;
    }
}

impl Linked<KernelList> for KernelAllocation {
    fn links(&self) -> &Links<KernelList> {
        &self.links
    }

    fn links_mut(&mut self) -> &mut Links<KernelList> {
        &mut self.links
    }
}

/// Result of an unload request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadOutcome {
    /// Record destroyed and memory returned
    Released,
    /// GPU still using it; released by a later `reclaim`
    Deferred,
    /// Nothing to do
    AlreadyFree,
}

/// What a `reclaim` pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimSummary {
    /// Moved from Submitted back to Allocated
    pub returned: usize,
    /// Destroyed because an unload was pending
    pub freed: usize,
}

/// Registry counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_reloads: u64,
    pub evictions: u64,
    pub deferred_unloads: u64,
    /// Deferred unloads undone by a reload before the GPU retired
    pub cancelled_unloads: u64,
    pub released: u64,
    pub pool_extensions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(KernelState::Used.is_resident());
        assert!(KernelState::Locked.is_resident());
        assert!(KernelState::Loading.is_resident());
        assert!(!KernelState::Stale.is_resident());
        assert!(!KernelState::Removed.is_resident());

        assert!(KernelState::Used.is_usable());
        assert!(!KernelState::Loading.is_usable());
    }

    #[test]
    fn test_binary_size() {
        let bytes = [0u8; 5];
        let kernel = KernelBinary::new(1, 0, &bytes);
        assert_eq!(kernel.size(), 5);
    }

    #[test]
    fn test_clear_resets_record() {
        let mut alloc = KernelAllocation {
            unique_id: 3,
            cache_id: 1,
            size: 64,
            state: KernelState::Used,
            pending_unload: true,
            ..KernelAllocation::default()
        };
        alloc.clear();
        assert_eq!(alloc.state(), KernelState::Free);
        assert_eq!(alloc.unique_id(), -1);
        assert!(!alloc.is_pending_unload());
        assert_eq!(alloc.offset(), None);
    }
}

//! Kernel allocation registry
//!
//! Tracks which kernel binaries occupy the instruction heap. Records live in
//! a slab and move between three lists:
//!
//! - `Pool`: unused records
//! - `Allocated`: registered, not referenced by in-flight GPU work. Records
//!   return here at the tail when their work retires, so the head is the
//!   least recently used end.
//! - `Submitted`: referenced by GPU work that has not retired yet
//!
//! Memory for a record is only reused after the GPU is done with it.

use crate::config::StateHeapConfig;
use crate::error::{bad_transition, out_of_space, HeapResult, RenderHeapError};
use crate::hash_table::CoalescedHashTable;
use crate::heap::{HeapBlock, HeapManager};
use crate::list::{unlink_all, IndexList};
use crate::tracker::{CompletionToken, CompletionTracker};
use crate::internal_error;

use super::types::{
    KernelAllocId, KernelAllocation, KernelBinding, KernelList, KernelState, ReclaimSummary,
    RegistryStats, UnloadOutcome,
};

/// Residency index for kernel binaries in the instruction heap
#[derive(Debug)]
pub struct KernelAllocationRegistry {
    slots: Vec<KernelAllocation>,
    pool: IndexList<KernelList>,
    allocated: IndexList<KernelList>,
    submitted: IndexList<KernelList>,
    hash: CoalescedHashTable<KernelAllocId>,
    heap: HeapManager,
    alignment: usize,
    alloc_increment: usize,
    /// Monotonic recency clock; each touch takes the next value
    access_clock: u64,
    stats: RegistryStats,
}

impl KernelAllocationRegistry {
    pub fn new(
        heap: HeapManager,
        hash: CoalescedHashTable<KernelAllocId>,
        alloc_increment: usize,
    ) -> Self {
        let alignment = heap.granularity();
        KernelAllocationRegistry {
            slots: Vec::new(),
            pool: IndexList::new(KernelList::Pool),
            allocated: IndexList::new(KernelList::Allocated),
            submitted: IndexList::new(KernelList::Submitted),
            hash,
            heap,
            alignment,
            alloc_increment: alloc_increment.max(1),
            access_clock: 0,
            stats: RegistryStats::default(),
        }
    }

    /// Build the heap manager and hash index described by `config`
    pub fn from_config(config: &StateHeapConfig) -> HeapResult<Self> {
        config.validate()?;
        let heap_config = &config.kernel_heap;
        let max = if config.can_grow() {
            heap_config.max_size
        } else {
            heap_config.initial_size
        };
        let heap = HeapManager::new(heap_config.initial_size, max, heap_config.block_alignment)?;
        let hash = CoalescedHashTable::new(
            config.hash_table.initial_capacity,
            config.hash_table.increment,
            config.hash_table.max_capacity,
        )?;
        Ok(Self::new(heap, hash, config.kernel_alloc_increment))
    }

    // ========== Lookup ==========

    /// Look up a kernel by id
    ///
    /// A hit may be in any registered state; check [`KernelAllocation::state`]
    /// to tell a usable kernel from a stale one.
    pub fn find(&self, unique_id: i32, cache_id: i32) -> Option<KernelAllocId> {
        let found = self.hash.get(unique_id, cache_id);
        tracing::trace!(unique_id, cache_id, hit = found.is_some(), "kernel lookup");
        found
    }

    pub fn get(&self, id: KernelAllocId) -> Option<&KernelAllocation> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.state != KernelState::Free)
    }

    pub fn state(&self, id: KernelAllocId) -> Option<KernelState> {
        self.get(id).map(|slot| slot.state)
    }

    /// Capture a registered kernel's key for a binding table
    pub fn binding(&self, id: KernelAllocId) -> HeapResult<KernelBinding> {
        let slot = self.slot(id)?;
        Ok(KernelBinding {
            id,
            unique_id: slot.unique_id,
            cache_id: slot.cache_id,
        })
    }

    /// The record a binding refers to, unless it was released since
    pub fn resolve(&self, binding: KernelBinding) -> Option<KernelAllocId> {
        self.get(binding.id)
            .filter(|slot| slot.unique_id == binding.unique_id && slot.cache_id == binding.cache_id)
            .map(|_| binding.id)
    }

    // ========== Allocation ==========

    /// Reserve heap space for a kernel and register it
    ///
    /// - Resident hit: returned as is, cancelling any deferred unload.
    /// - Stale hit: the same record gets fresh memory and goes back to
    ///   `Loading`.
    /// - Removed hit: the old record is destroyed and a new one created.
    /// - Miss: a new record in `Loading` is appended to the Allocated list.
    ///
    /// When the heap has no contiguous region of `size` bytes, an eviction
    /// pass runs first. Fails with `OutOfSpace` if that still is not enough;
    /// the caller decides whether to grow the heap.
    pub fn allocate(
        &mut self,
        unique_id: i32,
        cache_id: i32,
        size: usize,
        tracker: &CompletionTracker,
    ) -> HeapResult<KernelAllocId> {
        if size == 0 {
            return Err(crate::invalid_arg!(
                "kernel ({}, {}) has zero size",
                unique_id,
                cache_id
            ));
        }
        if cache_id < 0 {
            return Err(crate::invalid_arg!(
                "kernel ({}, {}) needs a concrete cache id",
                unique_id,
                cache_id
            ));
        }

        if let Some(id) = self.find(unique_id, cache_id) {
            let state = self.slot(id)?.state;
            match state {
                KernelState::Used | KernelState::Locked | KernelState::Loading => {
                    self.stats.hits += 1;
                    self.cancel_unload(id.index());
                    return Ok(id);
                }
                KernelState::Stale => {
                    let block = self.reserve_block(size, tracker)?;
                    let slot = self.slot_mut(id)?;
                    slot.block = Some(block);
                    slot.size = size;
                    slot.state = KernelState::Loading;
                    self.stats.stale_reloads += 1;
                    tracing::debug!(unique_id, cache_id, offset = block.offset, "stale kernel reloading");
                    return Ok(id);
                }
                KernelState::Removed => {
                    if self.slot(id)?.links.owner() == Some(KernelList::Submitted) {
                        return Err(bad_transition(KernelState::Removed, "reallocate while in flight"));
                    }
                    self.destroy(id.index())?;
                }
                KernelState::Free => {
                    return Err(internal_error!(
                        "free record {:?} still registered for ({}, {})",
                        id,
                        unique_id,
                        cache_id
                    ));
                }
            }
        }

        self.stats.misses += 1;
        let block = self.reserve_block(size, tracker)?;

        let idx = match self.take_from_pool() {
            Ok(idx) => idx,
            Err(err) => {
                self.heap.free(block)?;
                return Err(err);
            }
        };
        let id = KernelAllocId(idx as u32);

        if let Err(err) = self.hash.register(unique_id, cache_id, id) {
            self.heap.free(block)?;
            self.pool.push_back(&mut self.slots, idx)?;
            return Err(err.into());
        }

        let slot = &mut self.slots[idx];
        slot.clear();
        slot.unique_id = unique_id;
        slot.cache_id = cache_id;
        slot.size = size;
        slot.block = Some(block);
        slot.state = KernelState::Loading;
        self.allocated.push_back(&mut self.slots, idx)?;

        tracing::debug!(unique_id, cache_id, size, offset = block.offset, "kernel allocated");
        Ok(id)
    }

    /// Binary written; `Loading -> Used`
    pub fn mark_loaded(&mut self, id: KernelAllocId) -> HeapResult<()> {
        let slot = self.slot_mut(id)?;
        if slot.state != KernelState::Loading {
            return Err(bad_transition(slot.state, "finish loading"));
        }
        slot.state = KernelState::Used;
        self.touch(id)
    }

    /// Hand out a resident kernel again
    ///
    /// Counts a hit, cancels a deferred unload and touches the record.
    pub fn reuse(&mut self, id: KernelAllocId) -> HeapResult<()> {
        let state = self.slot(id)?.state;
        if !state.is_usable() {
            return Err(bad_transition(state, "reuse"));
        }
        self.stats.hits += 1;
        self.cancel_unload(id.index());
        self.touch(id)
    }

    /// Mark a kernel as just used
    pub fn touch(&mut self, id: KernelAllocId) -> HeapResult<()> {
        let clock = self.access_clock + 1;
        let slot = self.slot_mut(id)?;
        slot.access_count = clock;
        let unique_id = slot.unique_id;
        self.access_clock = clock;
        tracing::trace!(unique_id, clock, "kernel touched");
        Ok(())
    }

    /// Pin a resident kernel; `Used -> Locked`
    pub fn lock(&mut self, id: KernelAllocId) -> HeapResult<()> {
        let slot = self.slot_mut(id)?;
        if slot.state != KernelState::Used {
            return Err(bad_transition(slot.state, "lock"));
        }
        slot.state = KernelState::Locked;
        Ok(())
    }

    /// `Locked -> Used`
    pub fn unlock(&mut self, id: KernelAllocId) -> HeapResult<()> {
        let slot = self.slot_mut(id)?;
        if slot.state != KernelState::Locked {
            return Err(bad_transition(slot.state, "unlock"));
        }
        slot.state = KernelState::Used;
        Ok(())
    }

    /// Record that GPU work stamped `token` references this kernel
    ///
    /// Moves the record to the tail of the Submitted list. Only usable
    /// kernels may be submitted.
    pub fn mark_submitted(&mut self, id: KernelAllocId, token: CompletionToken) -> HeapResult<()> {
        let idx = id.index();
        let slot = self.slot(id)?;
        match slot.state {
            KernelState::Used | KernelState::Locked => {}
            KernelState::Stale | KernelState::Removed => {
                return Err(RenderHeapError::StaleEntry {
                    unique_id: slot.unique_id,
                    cache_id: slot.cache_id,
                })
            }
            state => return Err(bad_transition(state, "submit")),
        }
        if slot.pending_unload {
            return Err(bad_transition(slot.state, "submit after unload"));
        }

        self.detach(idx)?;
        let slot = &mut self.slots[idx];
        slot.sync = Some(match slot.sync {
            Some(previous) => previous.latest(token),
            None => token,
        });
        slot.use_count += 1;
        self.submitted.push_back(&mut self.slots, idx)?;
        Ok(())
    }

    /// Move retired records back from Submitted
    ///
    /// Records with a pending unload are destroyed instead.
    pub fn reclaim(&mut self, tracker: &CompletionTracker) -> HeapResult<ReclaimSummary> {
        let mut summary = ReclaimSummary::default();
        for idx in self.submitted.indices(&self.slots) {
            let retired = self.slots[idx]
                .sync
                .map_or(true, |token| tracker.is_retired(token));
            if !retired {
                continue;
            }

            if self.slots[idx].pending_unload {
                self.destroy(idx)?;
                summary.freed += 1;
            } else {
                self.submitted.remove(&mut self.slots, idx)?;
                self.allocated.push_back(&mut self.slots, idx)?;
                summary.returned += 1;
            }
        }

        if summary != ReclaimSummary::default() {
            tracing::debug!(
                returned = summary.returned,
                freed = summary.freed,
                in_flight = self.submitted.len(),
                "kernel reclaim"
            );
        }
        Ok(summary)
    }

    /// Unregister a kernel and return its memory
    ///
    /// If GPU work still references it, the record is flagged and released
    /// by the `reclaim` that observes the work retiring.
    pub fn unload(
        &mut self,
        id: KernelAllocId,
        tracker: &CompletionTracker,
    ) -> HeapResult<UnloadOutcome> {
        match self.slots.get(id.index()) {
            None => return Err(RenderHeapError::NotFound(format!("{:?}", id))),
            Some(slot) if slot.state == KernelState::Free => return Ok(UnloadOutcome::AlreadyFree),
            Some(_) => {}
        }

        self.reclaim(tracker)?;
        // reclaim may have released it already
        if self.slots[id.index()].state == KernelState::Free {
            return Ok(UnloadOutcome::Released);
        }

        if self.slots[id.index()].links.owner() == Some(KernelList::Submitted) {
            let slot = &mut self.slots[id.index()];
            slot.pending_unload = true;
            self.stats.deferred_unloads += 1;
            tracing::debug!(unique_id = slot.unique_id, "kernel unload deferred");
            return Ok(UnloadOutcome::Deferred);
        }

        self.destroy(id.index())?;
        Ok(UnloadOutcome::Released)
    }

    fn cancel_unload(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        if slot.pending_unload {
            slot.pending_unload = false;
            self.stats.cancelled_unloads += 1;
            tracing::debug!(unique_id = slot.unique_id, "deferred unload cancelled");
        }
    }

    /// Reclaim a kernel's memory but keep it registered (`-> Stale`)
    ///
    /// Rejected while GPU work may still read the memory.
    pub fn mark_stale(&mut self, id: KernelAllocId, tracker: &CompletionTracker) -> HeapResult<()> {
        self.reclaim(tracker)?;
        let slot = self.slot(id)?;
        if !slot.state.is_resident() {
            return Err(bad_transition(slot.state, "mark stale"));
        }
        if slot.links.owner() == Some(KernelList::Submitted) {
            return Err(bad_transition(slot.state, "mark stale while in flight"));
        }

        let block = slot.block;
        if let Some(block) = block {
            self.heap.free(block)?;
        }
        let slot = &mut self.slots[id.index()];
        slot.block = None;
        slot.state = KernelState::Stale;
        tracing::debug!(unique_id = slot.unique_id, cache_id = slot.cache_id, "kernel marked stale");
        Ok(())
    }

    /// The heap was replaced by a new one of `new_capacity` bytes
    ///
    /// Every record that held memory becomes `Stale`. Records stay in their
    /// lists; in-flight ones keep their tokens.
    pub fn invalidate_all(&mut self, new_capacity: usize) -> HeapResult<usize> {
        let mut invalidated = 0;
        for slot in self.slots.iter_mut() {
            if slot.block.take().is_some() || slot.state == KernelState::Loading {
                slot.state = KernelState::Stale;
                invalidated += 1;
            }
        }
        self.heap.reset(new_capacity)?;
        tracing::info!(invalidated, new_capacity, "kernel heap replaced");
        Ok(invalidated)
    }

    /// Drop every record and clear the heap
    pub fn reset(&mut self) -> HeapResult<()> {
        let capacity = self.heap.capacity();
        self.heap.reset(capacity)?;
        self.hash.clear();

        unlink_all(&mut self.slots);
        self.pool.clear();
        self.allocated.clear();
        self.submitted.clear();
        for idx in 0..self.slots.len() {
            self.slots[idx].clear();
            self.pool.push_back(&mut self.slots, idx)?;
        }

        self.access_clock = 0;
        self.stats = RegistryStats::default();
        tracing::info!(records = self.slots.len(), "kernel registry reset");
        Ok(())
    }

    // ========== Eviction ==========

    /// Allocate heap space, evicting idle kernels if needed
    fn reserve_block(&mut self, size: usize, tracker: &CompletionTracker) -> HeapResult<HeapBlock> {
        match self.heap.allocate(size, self.alignment) {
            Ok(block) => return Ok(block),
            Err(err) if err.is_out_of_space() => {}
            Err(err) => return Err(err),
        }

        self.evict(size, tracker)?;
        self.heap.allocate(size, self.alignment)
    }

    /// Free memory of idle kernels until `size` bytes fit contiguously
    ///
    /// Candidates: Allocated-list records in state `Used` (never `Locked`)
    /// that hold memory. Smallest access count goes first; ties keep list
    /// order (head first). Evicted records become `Removed`.
    pub fn evict(&mut self, size: usize, tracker: &CompletionTracker) -> HeapResult<usize> {
        self.reclaim(tracker)?;

        let mut candidates: Vec<(u64, usize, usize)> = self
            .allocated
            .iter(&self.slots)
            .enumerate()
            .filter(|(_, idx)| {
                let slot = &self.slots[*idx];
                slot.state == KernelState::Used && slot.block.is_some() && !slot.pending_unload
            })
            .map(|(position, idx)| (self.slots[idx].access_count, position, idx))
            .collect();
        candidates.sort_unstable();

        let mut evicted = 0;
        for (_, _, idx) in candidates {
            if self.heap.can_allocate(size, self.alignment) {
                break;
            }
            self.evict_one(idx)?;
            evicted += 1;
        }

        if !self.heap.can_allocate(size, self.alignment) {
            tracing::warn!(
                size,
                evicted,
                free = self.heap.free_bytes(),
                largest = self.heap.largest_free_block(),
                "kernel heap exhausted after eviction"
            );
            return Err(out_of_space(
                "kernel heap",
                size,
                self.heap.largest_free_block(),
            ));
        }

        tracing::debug!(size, evicted, "kernel eviction pass");
        Ok(evicted)
    }

    fn evict_one(&mut self, idx: usize) -> HeapResult<()> {
        let block = self.slots[idx].block.take();
        if let Some(block) = block {
            self.heap.free(block)?;
        }
        let slot = &mut self.slots[idx];
        slot.state = KernelState::Removed;
        self.stats.evictions += 1;
        tracing::debug!(
            unique_id = slot.unique_id,
            cache_id = slot.cache_id,
            access_count = slot.access_count,
            "kernel evicted"
        );
        Ok(())
    }

    // ========== Internal bookkeeping ==========

    fn slot(&self, id: KernelAllocId) -> HeapResult<&KernelAllocation> {
        self.get(id)
            .ok_or_else(|| RenderHeapError::NotFound(format!("{:?}", id)))
    }

    fn slot_mut(&mut self, id: KernelAllocId) -> HeapResult<&mut KernelAllocation> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.state != KernelState::Free)
            .ok_or_else(|| RenderHeapError::NotFound(format!("{:?}", id)))
    }

    fn detach(&mut self, idx: usize) -> HeapResult<()> {
        match self.slots[idx].links.owner() {
            Some(KernelList::Allocated) => self.allocated.remove(&mut self.slots, idx),
            Some(KernelList::Submitted) => self.submitted.remove(&mut self.slots, idx),
            Some(KernelList::Pool) => self.pool.remove(&mut self.slots, idx),
            None => Ok(()),
        }
    }

    /// Unregister, free memory and return the record to the pool
    fn destroy(&mut self, idx: usize) -> HeapResult<()> {
        self.detach(idx)?;
        let (unique_id, cache_id) = (self.slots[idx].unique_id, self.slots[idx].cache_id);

        match self.hash.unregister(unique_id, cache_id) {
            Some(found) if found.index() == idx => {}
            other => {
                return Err(internal_error!(
                    "hash entry for ({}, {}) pointed at {:?}, expected {}",
                    unique_id,
                    cache_id,
                    other,
                    idx
                ))
            }
        }

        if let Some(block) = self.slots[idx].block.take() {
            self.heap.free(block)?;
        }
        self.slots[idx].clear();
        self.pool.push_back(&mut self.slots, idx)?;
        self.stats.released += 1;
        tracing::debug!(unique_id, cache_id, "kernel released");
        Ok(())
    }

    fn take_from_pool(&mut self) -> HeapResult<usize> {
        if self.pool.is_empty() {
            self.extend_pool()?;
        }
        self.pool
            .pop_front(&mut self.slots)
            .ok_or_else(|| internal_error!("kernel allocation pool empty after extension"))
    }

    fn extend_pool(&mut self) -> HeapResult<()> {
        let start = self.slots.len();
        if start + self.alloc_increment > u32::MAX as usize {
            return Err(out_of_space("kernel allocation pool", start + 1, start));
        }
        self.slots.try_reserve(self.alloc_increment)?;
        for idx in start..start + self.alloc_increment {
            let mut slot = KernelAllocation::default();
            slot.clear();
            self.slots.push(slot);
            self.pool.push_back(&mut self.slots, idx)?;
        }
        self.stats.pool_extensions += 1;
        tracing::trace!(records = self.slots.len(), "kernel allocation pool extended");
        Ok(())
    }

    // ========== Queries ==========

    pub fn heap(&self) -> &HeapManager {
        &self.heap
    }

    /// Direct read access to the hash index
    pub fn hash_table(&self) -> &CoalescedHashTable<KernelAllocId> {
        &self.hash
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    /// Registered records (any state but Free)
    pub fn registered_count(&self) -> usize {
        self.allocated.len() + self.submitted.len()
    }

    /// Records holding heap memory
    pub fn resident_count(&self) -> usize {
        self.slots.iter().filter(|s| s.block.is_some()).count()
    }

    /// Records referenced by in-flight GPU work
    pub fn kernels_in_use(&self) -> usize {
        self.submitted.len()
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Allocated list, least recently returned first
    pub fn allocated_ids(&self) -> Vec<KernelAllocId> {
        self.allocated
            .iter(&self.slots)
            .map(|idx| KernelAllocId(idx as u32))
            .collect()
    }

    /// Submitted list in submission order
    pub fn submitted_ids(&self) -> Vec<KernelAllocId> {
        self.submitted
            .iter(&self.slots)
            .map(|idx| KernelAllocId(idx as u32))
            .collect()
    }
}

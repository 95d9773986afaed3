//! Media state pool
//!
//! States are carved from the general state heap, one fixed-size block each.
//! In fixed-slot mode the heap holds exactly `count` states and never grows;
//! in dynamic mode the pool adds `increment` states at a time until
//! `max_count`.

use crate::config::{HeapMode, MediaStateConfig, StateHeapConfig};
use crate::error::{bad_transition, out_of_space, HeapResult, RenderHeapError};
use crate::heap::HeapManager;
use crate::internal_error;
use crate::kernel::{KernelAllocationRegistry, KernelBinding};
use crate::list::IndexList;
use crate::tracker::{CompletionToken, CompletionTracker};

use super::types::{ComponentId, MediaState, MediaStateId, MediaStateList, MediaStatePoolStats};

/// Reusable dispatch descriptors, recycled once the GPU retires them
#[derive(Debug)]
pub struct MediaStatePool {
    mode: HeapMode,
    states: Vec<MediaState>,
    free: IndexList<MediaStateList>,
    reserved: IndexList<MediaStateList>,
    submitted: IndexList<MediaStateList>,
    /// General state heap bookkeeping
    heap: HeapManager,
    state_size: usize,
    kernels_per_state: usize,
    increment: usize,
    max_count: usize,
    stats: MediaStatePoolStats,
}

impl MediaStatePool {
    pub fn new(mode: HeapMode, config: &MediaStateConfig, granularity: usize) -> HeapResult<Self> {
        if config.state_size == 0 || config.kernels_per_state == 0 {
            return Err(crate::invalid_arg!(
                "media states need a non-zero size and kernel table"
            ));
        }
        if !granularity.is_power_of_two() {
            return Err(crate::invalid_arg!(
                "granularity must be a power of 2, got {}",
                granularity
            ));
        }

        let state_size = HeapManager::align_up(config.state_size, granularity);
        let max_count = match mode {
            HeapMode::FixedSlot => config.count,
            HeapMode::Dynamic => config.max_count.max(config.count),
        };
        // an empty dynamic pool still needs a non-zero heap to grow from
        let initial = config.count.max(1) * state_size;
        let heap = HeapManager::new(initial, max_count.max(1) * state_size, granularity)?;

        let mut pool = MediaStatePool {
            mode,
            states: Vec::new(),
            free: IndexList::new(MediaStateList::Free),
            reserved: IndexList::new(MediaStateList::Reserved),
            submitted: IndexList::new(MediaStateList::Submitted),
            heap,
            state_size,
            kernels_per_state: config.kernels_per_state,
            increment: config.increment,
            max_count,
            stats: MediaStatePoolStats::default(),
        };
        pool.add_states(config.count)?;

        tracing::debug!(
            ?mode,
            count = config.count,
            state_size,
            max_count,
            "media state pool created"
        );
        Ok(pool)
    }

    pub fn from_config(config: &StateHeapConfig) -> HeapResult<Self> {
        Self::new(
            config.mode,
            &config.media_states,
            config.kernel_heap.block_alignment,
        )
    }

    /// Reserve a state for `component`
    ///
    /// Pops the Free list; when it is empty a dynamic pool grows, a
    /// fixed-slot pool fails with `OutOfSpace`. The returned state has an
    /// empty kernel table.
    pub fn acquire(&mut self, component: ComponentId) -> HeapResult<MediaStateId> {
        if self.free.is_empty() {
            match self.mode {
                HeapMode::Dynamic => self.extend()?,
                HeapMode::FixedSlot => {
                    tracing::warn!(
                        in_use = self.in_use(),
                        count = self.states.len(),
                        "media state pool exhausted"
                    );
                    return Err(out_of_space("media state pool", 1, 0));
                }
            }
        }

        let idx = self
            .free
            .pop_front(&mut self.states)
            .ok_or_else(|| internal_error!("media state free list empty after extension"))?;
        let state = &mut self.states[idx];
        state.recycle();
        state.component = Some(component);
        self.reserved.push_back(&mut self.states, idx)?;
        self.stats.acquired += 1;

        tracing::trace!(state = idx, ?component, "media state acquired");
        Ok(MediaStateId(idx as u32))
    }

    /// Bind `kernel` into table slot `slot` of a reserved state
    pub fn bind_kernel(
        &mut self,
        id: MediaStateId,
        slot: usize,
        kernel: KernelBinding,
    ) -> HeapResult<()> {
        let state = self.state_mut(id)?;
        if state.links.owner() != Some(MediaStateList::Reserved) {
            return Err(bad_transition(state.links.owner(), "bind kernel"));
        }
        let table_len = state.kernels.len();
        let entry = state.kernels.get_mut(slot).ok_or_else(|| {
            crate::invalid_arg!(
                "kernel slot {} out of range (table holds {})",
                slot,
                table_len
            )
        })?;
        *entry = Some(kernel);
        Ok(())
    }

    pub fn kernels(&self, id: MediaStateId) -> HeapResult<&[Option<KernelBinding>]> {
        Ok(self.state(id)?.kernels())
    }

    /// Hand a reserved state to the GPU; `Reserved -> Submitted`
    pub fn submit(&mut self, id: MediaStateId, token: CompletionToken) -> HeapResult<()> {
        let idx = id.index();
        let owner = self.state(id)?.links.owner();
        if owner != Some(MediaStateList::Reserved) {
            return Err(bad_transition(owner, "submit"));
        }

        self.reserved.remove(&mut self.states, idx)?;
        let state = &mut self.states[idx];
        state.sync = Some(token);
        state.busy = true;
        self.submitted.push_back(&mut self.states, idx)?;
        self.stats.submitted += 1;

        tracing::trace!(state = idx, token = token.value(), "media state submitted");
        Ok(())
    }

    /// Return a state to the Free list
    ///
    /// A reserved state that never reached the GPU goes back at once. A
    /// submitted one only after its token retired; its kernels are touched
    /// so they stay warm.
    pub fn release(
        &mut self,
        id: MediaStateId,
        tracker: &CompletionTracker,
        registry: &mut KernelAllocationRegistry,
    ) -> HeapResult<()> {
        let idx = id.index();
        match self.state(id)?.links.owner() {
            Some(MediaStateList::Reserved) => {
                self.reserved.remove(&mut self.states, idx)?;
                self.states[idx].recycle();
                self.free.push_back(&mut self.states, idx)?;
                Ok(())
            }
            Some(MediaStateList::Submitted) => {
                let retired = self.states[idx]
                    .sync
                    .map_or(true, |token| tracker.is_retired(token));
                if !retired {
                    return Err(bad_transition(
                        MediaStateList::Submitted,
                        "release before GPU completion",
                    ));
                }
                self.recycle_submitted(idx, registry)
            }
            owner => Err(bad_transition(owner, "release")),
        }
    }

    /// Recycle every submitted state whose token retired
    ///
    /// Returns the number of states moved back to Free.
    pub fn reclaim(
        &mut self,
        tracker: &CompletionTracker,
        registry: &mut KernelAllocationRegistry,
    ) -> HeapResult<usize> {
        let mut recycled = 0;
        for idx in self.submitted.indices(&self.states) {
            let retired = self.states[idx]
                .sync
                .map_or(true, |token| tracker.is_retired(token));
            if retired {
                self.recycle_submitted(idx, registry)?;
                recycled += 1;
            }
        }
        if recycled > 0 {
            tracing::debug!(recycled, in_use = self.in_use(), "media states reclaimed");
        }
        Ok(recycled)
    }

    /// Return every state to Free
    pub fn reset(&mut self) -> HeapResult<()> {
        for idx in self.reserved.indices(&self.states) {
            self.reserved.remove(&mut self.states, idx)?;
            self.free.push_back(&mut self.states, idx)?;
        }
        for idx in self.submitted.indices(&self.states) {
            self.submitted.remove(&mut self.states, idx)?;
            self.free.push_back(&mut self.states, idx)?;
        }
        self.states.iter_mut().for_each(MediaState::recycle);
        Ok(())
    }

    fn recycle_submitted(
        &mut self,
        idx: usize,
        registry: &mut KernelAllocationRegistry,
    ) -> HeapResult<()> {
        for binding in self.states[idx].bound_kernels() {
            // the kernel may have been unloaded, and its record reused, since
            // the dispatch
            if let Some(kernel) = registry.resolve(binding) {
                registry.touch(kernel)?;
            }
        }
        self.submitted.remove(&mut self.states, idx)?;
        self.states[idx].recycle();
        self.free.push_back(&mut self.states, idx)?;
        self.stats.recycled += 1;
        Ok(())
    }

    /// Grow a dynamic pool by up to `increment` states
    fn extend(&mut self) -> HeapResult<()> {
        let count = self.states.len();
        let added = self.increment.min(self.max_count.saturating_sub(count));
        if added == 0 {
            tracing::warn!(count, max = self.max_count, "media state pool at maximum");
            return Err(out_of_space("media state pool", count + 1, self.max_count));
        }

        let needed = (count + added) * self.state_size;
        if needed > self.heap.capacity() {
            self.heap.grow(needed)?;
        }
        self.add_states(added)?;
        self.stats.extensions += 1;
        tracing::debug!(added, count = self.states.len(), "media state pool extended");
        Ok(())
    }

    fn add_states(&mut self, count: usize) -> HeapResult<()> {
        self.states.try_reserve(count)?;
        for _ in 0..count {
            let block = self.heap.allocate(self.state_size, self.heap.granularity())?;
            let idx = self.states.len();
            self.states.push(MediaState::new(block, self.kernels_per_state));
            self.free.push_back(&mut self.states, idx)?;
        }
        Ok(())
    }

    fn state(&self, id: MediaStateId) -> HeapResult<&MediaState> {
        self.states
            .get(id.index())
            .ok_or_else(|| RenderHeapError::NotFound(format!("{:?}", id)))
    }

    fn state_mut(&mut self, id: MediaStateId) -> HeapResult<&mut MediaState> {
        self.states
            .get_mut(id.index())
            .ok_or_else(|| RenderHeapError::NotFound(format!("{:?}", id)))
    }

    // ========== Queries ==========

    pub fn get(&self, id: MediaStateId) -> Option<&MediaState> {
        self.states.get(id.index())
    }

    /// Reserved plus submitted states
    pub fn in_use(&self) -> usize {
        self.reserved.len() + self.submitted.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.len()
    }

    /// States created so far
    pub fn capacity(&self) -> usize {
        self.states.len()
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Bytes per state after rounding to the heap granularity
    pub fn state_size(&self) -> usize {
        self.state_size
    }

    pub fn mode(&self) -> HeapMode {
        self.mode
    }

    pub fn heap(&self) -> &HeapManager {
        &self.heap
    }

    pub fn stats(&self) -> &MediaStatePoolStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_table::CoalescedHashTable;
    use crate::kernel::KernelAllocId;
    use crate::tracker::FenceProgress;
    use std::sync::Arc;

    fn config(count: usize, max_count: usize) -> MediaStateConfig {
        MediaStateConfig {
            count,
            state_size: 256,
            increment: 2,
            kernels_per_state: 4,
            max_count,
        }
    }

    fn registry() -> KernelAllocationRegistry {
        let heap = HeapManager::new(4096, 4096, 64).unwrap();
        let hash = CoalescedHashTable::new(16, 16, 256).unwrap();
        KernelAllocationRegistry::new(heap, hash, 4)
    }

    fn tracker() -> (CompletionTracker, Arc<FenceProgress>) {
        let fence = Arc::new(FenceProgress::new());
        (CompletionTracker::new(fence.clone()), fence)
    }

    fn bound(idx: u32) -> KernelBinding {
        KernelBinding {
            id: KernelAllocId(idx),
            unique_id: idx as i32,
            cache_id: 0,
        }
    }

    #[test]
    fn test_fixed_slot_layout() {
        let pool = MediaStatePool::new(HeapMode::FixedSlot, &config(3, 3), 64).unwrap();
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.free_count(), 3);
        for i in 0..3 {
            assert_eq!(pool.get(MediaStateId(i)).unwrap().offset(), i as usize * 256);
        }
    }

    #[test]
    fn test_fixed_slot_exhaustion() {
        let mut pool = MediaStatePool::new(HeapMode::FixedSlot, &config(2, 2), 64).unwrap();
        pool.acquire(ComponentId::Codec).unwrap();
        pool.acquire(ComponentId::Codec).unwrap();
        let err = pool.acquire(ComponentId::Codec).unwrap_err();
        assert!(err.is_out_of_space());
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn test_dynamic_growth() {
        let mut pool = MediaStatePool::new(HeapMode::Dynamic, &config(1, 4), 64).unwrap();
        for _ in 0..4 {
            pool.acquire(ComponentId::VideoProcessing).unwrap();
        }
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.stats().extensions, 2);
        assert_eq!(pool.heap().capacity(), 4 * 256);
        assert!(pool.acquire(ComponentId::VideoProcessing).unwrap_err().is_out_of_space());
    }

    #[test]
    fn test_bind_and_submit() {
        let mut pool = MediaStatePool::new(HeapMode::FixedSlot, &config(2, 2), 64).unwrap();
        let (mut tracker, _fence) = tracker();
        let id = pool.acquire(ComponentId::Compute).unwrap();
        pool.bind_kernel(id, 2, bound(5)).unwrap();
        assert!(pool.bind_kernel(id, 4, bound(5)).unwrap_err().is_user_error());
        assert_eq!(pool.kernels(id).unwrap()[2], Some(bound(5)));

        let token = tracker.issue();
        pool.submit(id, token).unwrap();
        let state = pool.get(id).unwrap();
        assert!(state.is_busy());
        assert_eq!(state.sync_token(), Some(token));
        assert_eq!(state.list(), Some(MediaStateList::Submitted));

        assert!(pool.bind_kernel(id, 0, bound(1)).is_err());
        assert!(pool.submit(id, token).is_err());
    }

    #[test]
    fn test_release_reserved_and_submitted() {
        let mut pool = MediaStatePool::new(HeapMode::FixedSlot, &config(2, 2), 64).unwrap();
        let mut reg = registry();
        let (mut tracker, fence) = tracker();

        let a = pool.acquire(ComponentId::Codec).unwrap();
        pool.release(a, &tracker, &mut reg).unwrap();
        assert_eq!(pool.free_count(), 2);
        assert!(pool.release(a, &tracker, &mut reg).is_err());

        let b = pool.acquire(ComponentId::Codec).unwrap();
        let token = tracker.issue();
        pool.submit(b, token).unwrap();
        assert!(matches!(
            pool.release(b, &tracker, &mut reg),
            Err(RenderHeapError::InvalidStateTransition { .. })
        ));

        fence.signal(token);
        pool.release(b, &tracker, &mut reg).unwrap();
        assert_eq!(pool.in_use(), 0);
        assert!(!pool.get(b).unwrap().is_busy());
    }

    #[test]
    fn test_reclaim_touches_bound_kernels() {
        let mut pool = MediaStatePool::new(HeapMode::FixedSlot, &config(2, 2), 64).unwrap();
        let mut reg = registry();
        let (mut tracker, fence) = tracker();

        let k1 = reg.allocate(1, 0, 64, &tracker).unwrap();
        reg.mark_loaded(k1).unwrap();
        let k2 = reg.allocate(2, 0, 64, &tracker).unwrap();
        reg.mark_loaded(k2).unwrap();
        assert!(reg.get(k1).unwrap().access_count() < reg.get(k2).unwrap().access_count());

        let state = pool.acquire(ComponentId::Codec).unwrap();
        pool.bind_kernel(state, 0, reg.binding(k1).unwrap()).unwrap();
        let token = tracker.issue();
        pool.submit(state, token).unwrap();

        assert_eq!(pool.reclaim(&tracker, &mut reg).unwrap(), 0);
        fence.signal(token);
        assert_eq!(pool.reclaim(&tracker, &mut reg).unwrap(), 1);

        assert!(reg.get(k1).unwrap().access_count() > reg.get(k2).unwrap().access_count());
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.stats().recycled, 1);
    }

    #[test]
    fn test_acquire_clears_previous_table() {
        let mut pool = MediaStatePool::new(HeapMode::FixedSlot, &config(1, 1), 64).unwrap();
        let mut reg = registry();
        let (tracker, _fence) = tracker();
        let id = pool.acquire(ComponentId::Codec).unwrap();
        pool.bind_kernel(id, 0, bound(3)).unwrap();
        pool.release(id, &tracker, &mut reg).unwrap();

        let again = pool.acquire(ComponentId::Compute).unwrap();
        assert_eq!(again, id);
        assert!(pool.kernels(again).unwrap().iter().all(Option::is_none));
        assert_eq!(pool.get(again).unwrap().component(), Some(ComponentId::Compute));
    }

    #[test]
    fn test_reset_frees_everything() {
        let mut pool = MediaStatePool::new(HeapMode::Dynamic, &config(2, 8), 64).unwrap();
        let (mut tracker, _fence) = tracker();
        let a = pool.acquire(ComponentId::Codec).unwrap();
        pool.acquire(ComponentId::Codec).unwrap();
        pool.submit(a, tracker.issue()).unwrap();

        pool.reset().unwrap();
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.free_count(), pool.capacity());
        assert!(!pool.get(a).unwrap().is_busy());
    }
}

//! State heap owner context
//!
//! [`StateHeap`] is what the encoder/dispatch layer talks to. It owns the
//! completion tracker, the kernel registry, the media state pool and the
//! heap memory, and sequences them for the common operations: load a
//! kernel, reserve a media state, submit, refresh.
//!
//! Single-threaded by contract: the caller serializes access. The only
//! concurrent party is the GPU, observed through [`GpuProgress`].

use std::sync::Arc;

use serde::Serialize;

use crate::config::{HeapMode, StateHeapConfig};
use crate::error::{bad_transition, out_of_space, HeapResult, RenderHeapError};
use crate::heap::{HeapMemory, HostHeapMemory};
use crate::internal_error;
use crate::kernel::{
    KernelAllocId, KernelAllocation, KernelAllocationRegistry, KernelBinary, KernelState,
    ReclaimSummary, RegistryStats, UnloadOutcome,
};
use crate::media_state::{
    ComponentId, MediaState, MediaStateId, MediaStateList, MediaStatePool, MediaStatePoolStats,
};
use crate::tracker::{CompletionToken, CompletionTracker, GpuProgress};

/// What one `refresh_sync` pass recycled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub media_states: usize,
    pub kernels: ReclaimSummary,
}

/// Snapshot of heap usage
#[derive(Debug, Clone, Serialize)]
pub struct StateHeapStats {
    pub mode: HeapMode,
    pub kernel_heap_capacity: usize,
    pub kernel_heap_used: usize,
    pub kernel_heap_largest_free: usize,
    pub kernels_registered: usize,
    pub kernels_resident: usize,
    pub kernels_in_flight: usize,
    pub media_states_total: usize,
    pub media_states_in_use: usize,
    pub latest_completed: u32,
    pub tokens_issued: u64,
    pub heap_expansions: u64,
    pub registry: RegistryStats,
    pub media_state_pool: MediaStatePoolStats,
}

/// Render-engine state heap: kernel cache plus media state pool
pub struct StateHeap {
    config: StateHeapConfig,
    tracker: CompletionTracker,
    registry: KernelAllocationRegistry,
    pool: MediaStatePool,
    memory: Box<dyn HeapMemory>,
    expansions: u64,
}

impl std::fmt::Debug for StateHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHeap")
            .field("mode", &self.config.mode)
            .field("tracker", &self.tracker)
            .field("kernel_heap_capacity", &self.memory.capacity())
            .field("kernels", &self.registry.registered_count())
            .field("media_states_in_use", &self.pool.in_use())
            .finish()
    }
}

impl StateHeap {
    /// Build a state heap backed by host memory
    pub fn new(config: StateHeapConfig, progress: Arc<dyn GpuProgress>) -> HeapResult<Self> {
        let memory = HostHeapMemory::new(config.kernel_heap.initial_size)?;
        Self::with_memory(config, progress, Box::new(memory))
    }

    /// Build a state heap over caller-supplied kernel heap memory
    ///
    /// `memory` must be at least `kernel_heap.initial_size` bytes.
    pub fn with_memory(
        config: StateHeapConfig,
        progress: Arc<dyn GpuProgress>,
        mut memory: Box<dyn HeapMemory>,
    ) -> HeapResult<Self> {
        config.validate()?;
        if memory.capacity() != config.kernel_heap.initial_size {
            memory.resize(config.kernel_heap.initial_size)?;
        }

        let registry = KernelAllocationRegistry::from_config(&config)?;
        let pool = MediaStatePool::from_config(&config)?;
        let tracker = CompletionTracker::new(progress);

        tracing::info!(
            mode = ?config.mode,
            kernel_heap = config.kernel_heap.initial_size,
            media_states = config.media_states.count,
            "state heap created"
        );

        Ok(StateHeap {
            config,
            tracker,
            registry,
            pool,
            memory,
            expansions: 0,
        })
    }

    // ========== Kernels ==========

    /// Make `kernel` resident and return its allocation
    ///
    /// A usable cached copy is returned without copying; a pending unload of
    /// that copy is cancelled. Otherwise heap
    /// space is reserved (evicting idle kernels, then growing the heap if
    /// allowed), the binary is copied and zero-padded to the block size,
    /// and the record becomes `Used`.
    pub fn load_kernel(&mut self, kernel: &KernelBinary<'_>) -> HeapResult<KernelAllocId> {
        let size = kernel.size();
        if size == 0 {
            return Err(crate::invalid_arg!(
                "kernel ({}, {}) has no binary",
                kernel.unique_id,
                kernel.cache_id
            ));
        }

        if let Some(id) = self.registry.find(kernel.unique_id, kernel.cache_id) {
            if self.registry.state(id).is_some_and(|s| s.is_usable()) {
                self.registry.reuse(id)?;
                return Ok(id);
            }
        }

        let id = match self
            .registry
            .allocate(kernel.unique_id, kernel.cache_id, size, &self.tracker)
        {
            Ok(id) => id,
            Err(RenderHeapError::OutOfSpace { .. }) if self.config.can_grow() => {
                self.expand_kernel_heap(size)?;
                self.registry
                    .allocate(kernel.unique_id, kernel.cache_id, size, &self.tracker)?
            }
            Err(err) => return Err(err),
        };

        let block = self
            .registry
            .get(id)
            .and_then(KernelAllocation::block)
            .ok_or_else(|| internal_error!("kernel {:?} allocated without a heap block", id))?;
        self.memory.write(block.offset, kernel.bytes)?;
        self.memory.fill(block.offset + size, block.size - size, 0)?;
        self.registry.mark_loaded(id)?;

        tracing::debug!(
            unique_id = kernel.unique_id,
            cache_id = kernel.cache_id,
            offset = block.offset,
            size,
            "kernel loaded"
        );
        Ok(id)
    }

    /// Grow the kernel heap so at least `additional` more bytes fit
    ///
    /// The heap is replaced, not extended in place: every kernel becomes
    /// `Stale` and must be loaded again. Returns the new capacity.
    pub fn expand_kernel_heap(&mut self, additional: usize) -> HeapResult<usize> {
        let current = self.registry.heap().capacity();
        let heap_config = &self.config.kernel_heap;
        let needed = current.saturating_add(additional);

        if self.config.mode == HeapMode::FixedSlot || needed > heap_config.max_size {
            tracing::warn!(
                current,
                additional,
                max = heap_config.max_size,
                "kernel heap cannot grow"
            );
            return Err(out_of_space("kernel heap", needed, heap_config.max_size));
        }

        let increment = heap_config.increment;
        let new_capacity = (needed.div_ceil(increment) * increment).min(heap_config.max_size);

        let invalidated = self.registry.invalidate_all(new_capacity)?;
        self.memory.resize(new_capacity)?;
        self.expansions += 1;

        tracing::info!(
            old = current,
            new = new_capacity,
            invalidated,
            "kernel heap expanded"
        );
        Ok(new_capacity)
    }

    /// Unload a kernel by id
    ///
    /// Unknown kernels report `AlreadyFree`. In-flight ones are released by
    /// a later `refresh_sync`.
    pub fn unload_kernel(&mut self, unique_id: i32, cache_id: i32) -> HeapResult<UnloadOutcome> {
        match self.registry.find(unique_id, cache_id) {
            Some(id) => self.registry.unload(id, &self.tracker),
            None => Ok(UnloadOutcome::AlreadyFree),
        }
    }

    pub fn lock_kernel(&mut self, id: KernelAllocId) -> HeapResult<()> {
        self.registry.lock(id)
    }

    pub fn unlock_kernel(&mut self, id: KernelAllocId) -> HeapResult<()> {
        self.registry.unlock(id)
    }

    /// Lookup without side effects
    pub fn find_kernel(&self, unique_id: i32, cache_id: i32) -> Option<&KernelAllocation> {
        self.registry
            .find(unique_id, cache_id)
            .and_then(|id| self.registry.get(id))
    }

    pub fn kernel(&self, id: KernelAllocId) -> Option<&KernelAllocation> {
        self.registry.get(id)
    }

    /// Binary bytes of a resident kernel as stored in the heap
    pub fn kernel_bytes(&self, id: KernelAllocId) -> HeapResult<&[u8]> {
        let alloc = self
            .registry
            .get(id)
            .ok_or_else(|| RenderHeapError::NotFound(format!("{:?}", id)))?;
        let block = alloc.block().ok_or(RenderHeapError::StaleEntry {
            unique_id: alloc.unique_id(),
            cache_id: alloc.cache_id(),
        })?;
        self.memory.read(block.offset, alloc.size())
    }

    // ========== Media states ==========

    /// Recycle whatever the GPU has finished with
    ///
    /// Media states go first so their kernels are touched before the
    /// registry releases pending unloads.
    pub fn refresh_sync(&mut self) -> HeapResult<SyncSummary> {
        let media_states = self.pool.reclaim(&self.tracker, &mut self.registry)?;
        let kernels = self.registry.reclaim(&self.tracker)?;
        Ok(SyncSummary {
            media_states,
            kernels,
        })
    }

    /// Reserve a media state for `component`
    pub fn assign_media_state(&mut self, component: ComponentId) -> HeapResult<MediaStateId> {
        self.refresh_sync()?;
        self.pool.acquire(component)
    }

    /// Bind a usable kernel into a reserved media state
    pub fn bind_kernel(
        &mut self,
        state: MediaStateId,
        slot: usize,
        kernel: KernelAllocId,
    ) -> HeapResult<()> {
        self.check_usable(kernel)?;
        let binding = self.registry.binding(kernel)?;
        self.pool.bind_kernel(state, slot, binding)
    }

    /// Submit a reserved media state and every kernel bound to it
    ///
    /// Issues one completion token for the whole dispatch.
    pub fn submit(&mut self, state: MediaStateId) -> HeapResult<CompletionToken> {
        let media_state = self
            .pool
            .get(state)
            .ok_or_else(|| RenderHeapError::NotFound(format!("{:?}", state)))?;
        if media_state.list() != Some(MediaStateList::Reserved) {
            return Err(bad_transition(media_state.list(), "submit"));
        }

        let mut kernels = Vec::new();
        for binding in media_state.bound_kernels() {
            let kernel = self
                .registry
                .resolve(binding)
                .ok_or(RenderHeapError::StaleEntry {
                    unique_id: binding.unique_id,
                    cache_id: binding.cache_id,
                })?;
            self.check_usable(kernel)?;
            kernels.push(kernel);
        }

        let token = self.tracker.issue();
        for kernel in kernels {
            self.registry.mark_submitted(kernel, token)?;
        }
        self.pool.submit(state, token)?;

        tracing::debug!(state = state.index(), token = token.value(), "media state submitted");
        Ok(token)
    }

    /// Give a media state back without waiting for `refresh_sync`
    pub fn release_media_state(&mut self, state: MediaStateId) -> HeapResult<()> {
        self.pool.release(state, &self.tracker, &mut self.registry)
    }

    pub fn media_state(&self, id: MediaStateId) -> Option<&MediaState> {
        self.pool.get(id)
    }

    // ========== Whole-heap ==========

    /// Drop every kernel and media state
    ///
    /// The caller must have waited for the GPU to go idle.
    pub fn reset(&mut self) -> HeapResult<()> {
        self.pool.reset()?;
        self.registry.reset()?;
        let capacity = self.memory.capacity();
        self.memory.fill(0, capacity, 0)?;
        tracing::info!(capacity, "state heap reset");
        Ok(())
    }

    pub fn stats(&self) -> StateHeapStats {
        let heap = self.registry.heap();
        StateHeapStats {
            mode: self.config.mode,
            kernel_heap_capacity: heap.capacity(),
            kernel_heap_used: heap.used_bytes(),
            kernel_heap_largest_free: heap.largest_free_block(),
            kernels_registered: self.registry.registered_count(),
            kernels_resident: self.registry.resident_count(),
            kernels_in_flight: self.registry.kernels_in_use(),
            media_states_total: self.pool.capacity(),
            media_states_in_use: self.pool.in_use(),
            latest_completed: self.tracker.latest_completed().value(),
            tokens_issued: self.tracker.issued_count(),
            heap_expansions: self.expansions,
            registry: self.registry.stats().clone(),
            media_state_pool: self.pool.stats().clone(),
        }
    }

    pub fn config(&self) -> &StateHeapConfig {
        &self.config
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &KernelAllocationRegistry {
        &self.registry
    }

    pub fn media_states(&self) -> &MediaStatePool {
        &self.pool
    }

    pub fn memory(&self) -> &dyn HeapMemory {
        self.memory.as_ref()
    }

    fn check_usable(&self, kernel: KernelAllocId) -> HeapResult<()> {
        let alloc = self
            .registry
            .get(kernel)
            .ok_or_else(|| RenderHeapError::NotFound(format!("{:?}", kernel)))?;
        match alloc.state() {
            KernelState::Used | KernelState::Locked if !alloc.is_pending_unload() => Ok(()),
            KernelState::Stale | KernelState::Removed => Err(RenderHeapError::StaleEntry {
                unique_id: alloc.unique_id(),
                cache_id: alloc.cache_id(),
            }),
            state => Err(bad_transition(state, "bind")),
        }
    }
}

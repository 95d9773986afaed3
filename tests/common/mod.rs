//! Shared fixtures for state heap integration tests
//!
//! Every test gets its own fence so GPU progress can be driven by hand:
//! `fence.signal(token)` plays the part of the GPU retiring a submission.

#![allow(dead_code)]

use std::sync::Arc;

use renderheap::config::{HashTableConfig, KernelHeapConfig, MediaStateConfig};
use renderheap::{
    CompletionTracker, FenceProgress, HeapMode, KernelAllocId, KernelAllocationRegistry,
    StateHeap, StateHeapConfig,
};

/// Fresh fence plus a tracker reading it
pub fn tracker() -> (CompletionTracker, Arc<FenceProgress>) {
    let fence = Arc::new(FenceProgress::new());
    (CompletionTracker::new(fence.clone()), fence)
}

/// Dynamic configuration small enough to exhaust in a few loads
pub fn small_config(heap_size: usize) -> StateHeapConfig {
    StateHeapConfig::new()
        .with_kernel_heap(KernelHeapConfig {
            initial_size: heap_size,
            increment: heap_size,
            max_size: heap_size * 4,
            block_alignment: 64,
        })
        .with_media_states(MediaStateConfig {
            count: 2,
            state_size: 256,
            increment: 2,
            kernels_per_state: 8,
            max_count: 16,
        })
        .with_hash_table(HashTableConfig {
            initial_capacity: 16,
            increment: 16,
            max_capacity: 1024,
        })
        .with_kernel_alloc_increment(4)
}

/// Same sizes, but nothing may grow
pub fn fixed_config(heap_size: usize) -> StateHeapConfig {
    let mut config = small_config(heap_size).with_mode(HeapMode::FixedSlot);
    config.kernel_heap.max_size = heap_size;
    config.media_states.max_count = config.media_states.count;
    config
}

/// Registry over a kernel heap that cannot grow
pub fn registry(heap_size: usize) -> KernelAllocationRegistry {
    KernelAllocationRegistry::from_config(&fixed_config(heap_size))
        .expect("fixed test configuration is valid")
}

pub fn state_heap(config: StateHeapConfig) -> (StateHeap, Arc<FenceProgress>) {
    let fence = Arc::new(FenceProgress::new());
    let heap = StateHeap::new(config, fence.clone()).expect("test configuration is valid");
    (heap, fence)
}

/// Allocate and finish loading a kernel
pub fn load(
    registry: &mut KernelAllocationRegistry,
    tracker: &CompletionTracker,
    unique_id: i32,
    size: usize,
) -> KernelAllocId {
    let id = registry
        .allocate(unique_id, 0, size, tracker)
        .expect("allocation fits");
    registry.mark_loaded(id).expect("fresh allocation is loading");
    id
}

/// Deterministic binary contents
pub fn binary(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

//! Kernel residency in the instruction heap
//!
//! Codec and video-processing kernels are cached in the instruction heap
//! so repeated submissions do not copy the binary again. This module tracks
//! which kernels are resident, where they live, and whether the GPU may
//! still be reading them.
//!
//! # State machine
//!
//! ```text
//! Free -> Loading -> Used <-> Locked
//!                     |
//!          evict      v        heap replaced
//!         Removed <- Used  ->  Stale -> Loading
//! ```
//!
//! `Removed` and `Stale` records stay registered in the hash index; only an
//! unload returns a record to `Free`.

pub mod registry;
pub mod types;

pub use registry::KernelAllocationRegistry;
pub use types::{
    KernelAllocId, KernelAllocation, KernelBinary, KernelBinding, KernelList, KernelState, ReclaimSummary,
    RegistryStats, UnloadOutcome,
};

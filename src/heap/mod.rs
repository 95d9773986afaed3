//! Heap management for the instruction and general state heaps
//!
//! A state heap is one large device buffer subdivided on the CPU side.
//! [`HeapManager`] does the bookkeeping (which byte ranges are live), while a
//! [`HeapMemory`] implementation owns the bytes themselves.
//!
//! # Pattern
//!
//! 1. Size the heap once (or grow it in increments, up to a maximum)
//! 2. Subdivide with best-fit free block allocation
//! 3. Coalesce neighbours on free so large kernels still fit later

pub mod manager;
pub mod memory;

pub use manager::{HeapBlock, HeapManager, HeapStats};
pub use memory::{HeapMemory, HostHeapMemory};

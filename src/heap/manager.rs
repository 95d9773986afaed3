//! Best-fit block allocator over a byte-addressed heap

use std::collections::BTreeMap;

use crate::error::{out_of_space, HeapResult};
use crate::invalid_arg;

/// Free region within the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeBlock {
    offset: usize,
    size: usize,
}

impl FreeBlock {
    fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Check if this block is immediately before another block
    fn is_adjacent_to(&self, other: &FreeBlock) -> bool {
        self.end() == other.offset
    }
}

/// Live region handed out by [`HeapManager::allocate`]
///
/// `size` is the reserved size, the request rounded up to the heap
/// granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapBlock {
    pub offset: usize,
    pub size: usize,
}

impl HeapBlock {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Allocation counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub total_allocations: usize,
    pub total_frees: usize,
    pub failed_allocations: usize,
    pub peak_used_bytes: usize,
    pub grow_count: usize,
    pub reset_count: usize,
}

/// Variable-size block allocator
///
/// Best-fit: the smallest free block that satisfies the aligned request
/// wins, which keeps large runs available for large kernels. Every request
/// is rounded up to `granularity`, so the heap never fragments below that
/// size and every offset is granularity-aligned.
#[derive(Debug, Clone)]
pub struct HeapManager {
    capacity: usize,
    max_capacity: usize,
    granularity: usize,
    used: usize,
    /// Sorted by offset, adjacent blocks always merged
    free_blocks: Vec<FreeBlock>,
    /// offset -> reserved size
    live: BTreeMap<usize, usize>,
    stats: HeapStats,
}

impl HeapManager {
    /// Create a manager for a heap of `capacity` bytes that may grow up to
    /// `max_capacity`
    ///
    /// # Errors
    /// - `capacity` is zero or above `max_capacity`
    /// - `granularity` is not a power of two
    pub fn new(capacity: usize, max_capacity: usize, granularity: usize) -> HeapResult<Self> {
        if capacity == 0 {
            return Err(invalid_arg!("heap capacity cannot be zero"));
        }
        if capacity > max_capacity {
            return Err(invalid_arg!(
                "heap capacity {} exceeds maximum {}",
                capacity,
                max_capacity
            ));
        }
        if !granularity.is_power_of_two() {
            return Err(invalid_arg!(
                "heap granularity must be a power of 2, got {}",
                granularity
            ));
        }

        tracing::debug!(capacity, max_capacity, granularity, "heap manager created");

        Ok(Self {
            capacity,
            max_capacity,
            granularity,
            used: 0,
            free_blocks: vec![FreeBlock::new(0, capacity)],
            live: BTreeMap::new(),
            stats: HeapStats::default(),
        })
    }

    /// Reserve `size` bytes aligned to at least `alignment`
    ///
    /// # Errors
    /// - `InvalidArgument` if `size` is zero or `alignment` is not a power of 2
    /// - `OutOfSpace` if no free block fits; the heap is left unchanged
    pub fn allocate(&mut self, size: usize, alignment: usize) -> HeapResult<HeapBlock> {
        if size == 0 {
            return Err(invalid_arg!("allocation size cannot be zero"));
        }
        if !alignment.is_power_of_two() {
            return Err(invalid_arg!(
                "alignment must be a power of 2, got {}",
                alignment
            ));
        }

        let effective_alignment = alignment.max(self.granularity);
        let reserved = Self::align_up(size, self.granularity);

        let best_idx = match self.find_best_fit(reserved, effective_alignment) {
            Some(idx) => idx,
            None => {
                self.stats.failed_allocations += 1;
                tracing::debug!(
                    size = reserved,
                    free = self.free_bytes(),
                    fragments = self.free_blocks.len(),
                    "heap allocation failed"
                );
                return Err(out_of_space("heap", reserved, self.largest_free_block()));
            }
        };

        let block = self.free_blocks.remove(best_idx);
        let offset = Self::align_up(block.offset, effective_alignment);
        let padding = offset - block.offset;
        let remaining = block.size - padding - reserved;

        if padding > 0 {
            self.free_blocks.push(FreeBlock::new(block.offset, padding));
        }
        if remaining > 0 {
            self.free_blocks.push(FreeBlock::new(offset + reserved, remaining));
        }
        self.sort_free_blocks();

        self.used += reserved;
        self.live.insert(offset, reserved);
        self.stats.total_allocations += 1;
        self.stats.peak_used_bytes = self.stats.peak_used_bytes.max(self.used);

        tracing::trace!(offset, size = reserved, alignment = effective_alignment, "heap allocated");

        Ok(HeapBlock {
            offset,
            size: reserved,
        })
    }

    /// Return a block to the free list, merging with its neighbours
    ///
    /// # Errors
    /// `InvalidArgument` if `block` is not live (double free or foreign block)
    pub fn free(&mut self, block: HeapBlock) -> HeapResult<()> {
        match self.live.get(&block.offset) {
            Some(&size) if size == block.size => {}
            _ => {
                return Err(invalid_arg!(
                    "block at offset {} ({} bytes) is not allocated",
                    block.offset,
                    block.size
                ))
            }
        }

        self.live.remove(&block.offset);
        self.used -= block.size;
        self.free_blocks.push(FreeBlock::new(block.offset, block.size));
        self.sort_free_blocks();
        self.stats.total_frees += 1;

        tracing::trace!(offset = block.offset, size = block.size, "heap freed");
        Ok(())
    }

    /// Whether `allocate(size, alignment)` would succeed right now
    pub fn can_allocate(&self, size: usize, alignment: usize) -> bool {
        if size == 0 || !alignment.is_power_of_two() {
            return false;
        }
        let reserved = Self::align_up(size, self.granularity);
        self.find_best_fit(reserved, alignment.max(self.granularity))
            .is_some()
    }

    /// Extend the heap to `new_capacity` bytes, keeping live blocks
    pub fn grow(&mut self, new_capacity: usize) -> HeapResult<()> {
        if new_capacity < self.capacity {
            return Err(invalid_arg!(
                "cannot shrink heap from {} to {}",
                self.capacity,
                new_capacity
            ));
        }
        if new_capacity > self.max_capacity {
            return Err(out_of_space("heap growth", new_capacity, self.max_capacity));
        }
        if new_capacity == self.capacity {
            return Ok(());
        }

        self.free_blocks
            .push(FreeBlock::new(self.capacity, new_capacity - self.capacity));
        self.sort_free_blocks();
        tracing::info!(old = self.capacity, new = new_capacity, "heap grown");
        self.capacity = new_capacity;
        self.stats.grow_count += 1;
        Ok(())
    }

    /// Forget every live block and start over with `new_capacity` bytes
    pub fn reset(&mut self, new_capacity: usize) -> HeapResult<()> {
        if new_capacity == 0 {
            return Err(invalid_arg!("heap capacity cannot be zero"));
        }
        if new_capacity > self.max_capacity {
            return Err(out_of_space("heap reset", new_capacity, self.max_capacity));
        }

        tracing::info!(
            old = self.capacity,
            new = new_capacity,
            dropped = self.live.len(),
            "heap reset"
        );
        self.capacity = new_capacity;
        self.used = 0;
        self.live.clear();
        self.free_blocks = vec![FreeBlock::new(0, new_capacity)];
        self.stats.reset_count += 1;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn granularity(&self) -> usize {
        self.granularity
    }

    pub fn used_bytes(&self) -> usize {
        self.used
    }

    pub fn free_bytes(&self) -> usize {
        self.free_blocks.iter().map(|b| b.size).sum()
    }

    pub fn largest_free_block(&self) -> usize {
        self.free_blocks.iter().map(|b| b.size).max().unwrap_or(0)
    }

    pub fn live_blocks(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, block: &HeapBlock) -> bool {
        self.live.get(&block.offset) == Some(&block.size)
    }

    /// Fragmentation ratio (0.0 = one contiguous free run)
    pub fn fragmentation(&self) -> f32 {
        let free = self.free_bytes();
        if free == 0 {
            return 0.0;
        }
        1.0 - (self.largest_free_block() as f32 / free as f32)
    }

    pub fn fragment_count(&self) -> usize {
        self.free_blocks.len()
    }

    pub fn stats(&self) -> &HeapStats {
        &self.stats
    }

    fn find_best_fit(&self, size: usize, alignment: usize) -> Option<usize> {
        self.free_blocks
            .iter()
            .enumerate()
            .filter_map(|(idx, block)| {
                let aligned_offset = Self::align_up(block.offset, alignment);
                if aligned_offset >= block.end() {
                    return None;
                }
                let usable = block.end() - aligned_offset;
                if usable >= size {
                    Some((idx, usable))
                } else {
                    None
                }
            })
            .min_by_key(|&(_, usable)| usable)
            .map(|(idx, _)| idx)
    }

    /// Align up to a power-of-two boundary
    pub fn align_up(value: usize, alignment: usize) -> usize {
        (value + alignment - 1) & !(alignment - 1)
    }

    fn sort_free_blocks(&mut self) {
        self.free_blocks.sort_by_key(|b| b.offset);
        self.coalesce_free_blocks();
    }

    fn coalesce_free_blocks(&mut self) {
        let mut i = 0;
        while i + 1 < self.free_blocks.len() {
            let current = self.free_blocks[i];
            let next = self.free_blocks[i + 1];

            if current.is_adjacent_to(&next) {
                self.free_blocks[i].size += next.size;
                self.free_blocks.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }
}

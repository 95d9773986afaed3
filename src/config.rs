//! State heap configuration
//!
//! All sizing decisions are made here and passed in at construction time.
//! Nothing in the crate reads process-wide tables.

use serde::{Deserialize, Serialize};

use crate::error::{HeapResult, RenderHeapError};

/// Kernel heap and media-state granularity in bytes
pub const DEFAULT_BLOCK_ALIGNMENT: usize = 64;

/// Media states added per dynamic pool extension
pub const DEFAULT_MEDIA_STATE_INCREMENT: usize = 16;

/// Kernel allocation records added per registry pool extension
pub const DEFAULT_KERNEL_ALLOC_INCREMENT: usize = 16;

/// How the state heap obtains its memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeapMode {
    /// Heaps are sized once; media states are a fixed array
    FixedSlot,
    /// Heaps grow on demand up to their configured maximum
    #[default]
    Dynamic,
}

/// Instruction heap sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelHeapConfig {
    pub initial_size: usize,
    /// Growth step; new sizes are rounded up to a multiple of this
    pub increment: usize,
    pub max_size: usize,
    /// Heap granularity, a power of two
    pub block_alignment: usize,
}

impl Default for KernelHeapConfig {
    fn default() -> Self {
        KernelHeapConfig {
            initial_size: 128 * 1024,
            increment: 64 * 1024,
            max_size: 2 * 1024 * 1024,
            block_alignment: DEFAULT_BLOCK_ALIGNMENT,
        }
    }
}

/// Media state pool sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStateConfig {
    /// Number of states created up front (the whole pool in fixed-slot mode)
    pub count: usize,
    /// Bytes of general state heap reserved per media state
    pub state_size: usize,
    /// States added per extension in dynamic mode
    pub increment: usize,
    /// Kernel allocation table entries per state
    pub kernels_per_state: usize,
    /// Hard ceiling on states in dynamic mode
    pub max_count: usize,
}

impl Default for MediaStateConfig {
    fn default() -> Self {
        MediaStateConfig {
            count: 32,
            state_size: 4 * 1024,
            increment: DEFAULT_MEDIA_STATE_INCREMENT,
            kernels_per_state: 16,
            max_count: 256,
        }
    }
}

/// Kernel hash index sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashTableConfig {
    /// Entries allocated at init, including the reserved slot 0
    pub initial_capacity: u16,
    pub increment: u16,
    pub max_capacity: u16,
}

impl Default for HashTableConfig {
    fn default() -> Self {
        HashTableConfig {
            initial_capacity: 128,
            increment: 64,
            max_capacity: 4096,
        }
    }
}

/// Preset configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapPreset {
    /// Few kernels, fixed pools (tests, embedded callers)
    Compact,
    /// Typical video-processing pipeline
    Standard,
    /// Many kernel variants (codec + VP + compute) in one context
    Large,
    /// Explicit kernel heap bounds, everything else from `Standard`
    Custom {
        initial_size: usize,
        max_size: usize,
    },
}

/// Complete configuration for a [`crate::state_heap::StateHeap`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHeapConfig {
    pub mode: HeapMode,
    pub kernel_heap: KernelHeapConfig,
    pub media_states: MediaStateConfig,
    pub hash_table: HashTableConfig,
    pub kernel_alloc_increment: usize,
}

impl Default for StateHeapConfig {
    fn default() -> Self {
        StateHeapConfig {
            mode: HeapMode::default(),
            kernel_heap: KernelHeapConfig::default(),
            media_states: MediaStateConfig::default(),
            hash_table: HashTableConfig::default(),
            kernel_alloc_increment: DEFAULT_KERNEL_ALLOC_INCREMENT,
        }
    }
}

impl StateHeapConfig {
    /// Default dynamic configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a configuration from a preset
    pub fn from_preset(preset: HeapPreset) -> HeapResult<Self> {
        let base = StateHeapConfig::new();
        let config = match preset {
            HeapPreset::Compact => base.with_mode(HeapMode::FixedSlot).with_kernel_heap(
                KernelHeapConfig {
                    initial_size: 16 * 1024,
                    increment: 16 * 1024,
                    max_size: 16 * 1024,
                    block_alignment: DEFAULT_BLOCK_ALIGNMENT,
                },
            )
            .with_media_states(MediaStateConfig {
                count: 8,
                max_count: 8,
                ..MediaStateConfig::default()
            }),
            HeapPreset::Standard => base,
            HeapPreset::Large => base
                .with_kernel_heap(KernelHeapConfig {
                    initial_size: 1024 * 1024,
                    increment: 256 * 1024,
                    max_size: 16 * 1024 * 1024,
                    block_alignment: DEFAULT_BLOCK_ALIGNMENT,
                })
                .with_media_states(MediaStateConfig {
                    count: 64,
                    max_count: 1024,
                    ..MediaStateConfig::default()
                })
                .with_hash_table(HashTableConfig {
                    initial_capacity: 512,
                    increment: 256,
                    max_capacity: 16384,
                }),
            HeapPreset::Custom {
                initial_size,
                max_size,
            } => {
                let mut config = base;
                config.kernel_heap.initial_size = initial_size;
                config.kernel_heap.max_size = max_size;
                config
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_mode(mut self, mode: HeapMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_kernel_heap(mut self, kernel_heap: KernelHeapConfig) -> Self {
        self.kernel_heap = kernel_heap;
        self
    }

    pub fn with_media_states(mut self, media_states: MediaStateConfig) -> Self {
        self.media_states = media_states;
        self
    }

    pub fn with_hash_table(mut self, hash_table: HashTableConfig) -> Self {
        self.hash_table = hash_table;
        self
    }

    pub fn with_kernel_alloc_increment(mut self, increment: usize) -> Self {
        self.kernel_alloc_increment = increment;
        self
    }

    /// Check every sizing rule
    pub fn validate(&self) -> HeapResult<()> {
        let heap = &self.kernel_heap;
        if !heap.block_alignment.is_power_of_two() {
            return Err(invalid(format!(
                "block_alignment must be a power of two, got {}",
                heap.block_alignment
            )));
        }
        if heap.initial_size == 0 || heap.increment == 0 {
            return Err(invalid("kernel heap sizes must be non-zero"));
        }
        for (name, value) in [
            ("initial_size", heap.initial_size),
            ("increment", heap.increment),
            ("max_size", heap.max_size),
        ] {
            if value % heap.block_alignment != 0 {
                return Err(invalid(format!(
                    "kernel heap {} ({}) is not a multiple of {}",
                    name, value, heap.block_alignment
                )));
            }
        }
        if heap.initial_size > heap.max_size {
            return Err(invalid(format!(
                "kernel heap initial_size {} exceeds max_size {}",
                heap.initial_size, heap.max_size
            )));
        }

        let states = &self.media_states;
        if states.state_size == 0 || states.kernels_per_state == 0 {
            return Err(invalid("media state size and table length must be non-zero"));
        }
        match self.mode {
            HeapMode::FixedSlot if states.count == 0 => {
                return Err(invalid("fixed-slot mode needs at least one media state"));
            }
            HeapMode::Dynamic if states.increment == 0 => {
                return Err(invalid("dynamic mode needs a non-zero media state increment"));
            }
            _ => {}
        }
        if states.count > states.max_count {
            return Err(invalid(format!(
                "media state count {} exceeds max_count {}",
                states.count, states.max_count
            )));
        }

        let hash = &self.hash_table;
        if hash.initial_capacity < 2
            || hash.initial_capacity > hash.max_capacity
            || hash.increment == 0
        {
            return Err(invalid(format!(
                "hash table capacities invalid: initial {}, increment {}, max {}",
                hash.initial_capacity, hash.increment, hash.max_capacity
            )));
        }

        if self.kernel_alloc_increment == 0 {
            return Err(invalid("kernel_alloc_increment must be non-zero"));
        }

        Ok(())
    }

    /// True when the kernel heap may grow past its initial size
    pub fn can_grow(&self) -> bool {
        self.mode == HeapMode::Dynamic && self.kernel_heap.max_size > self.kernel_heap.initial_size
    }
}

fn invalid(msg: impl Into<String>) -> RenderHeapError {
    RenderHeapError::InvalidConfiguration(msg.into())
}

//! State Heap Benchmark Suite
//!
//! Benchmarks for the kernel cache hot paths:
//! - Hash table register/search with growth
//! - Kernel load hit vs. miss
//! - Eviction under a full heap
//! - Media state acquire/submit/recycle cycle
//!
//! Run with: `cargo bench --bench state_heap_bench`

use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

use renderheap::config::{KernelHeapConfig, MediaStateConfig};
use renderheap::{
    CoalescedHashTable, ComponentId, FenceProgress, HeapMode, KernelBinary, SearchCursor,
    StateHeap, StateHeapConfig,
};

// ============================================================================
// Benchmark Harness
// ============================================================================

struct Benchmark {
    name: String,
    iterations: usize,
    warmup_iterations: usize,
}

impl Benchmark {
    fn new(name: &str, iterations: usize) -> Self {
        Benchmark {
            name: name.to_string(),
            iterations,
            warmup_iterations: iterations.min(10),
        }
    }

    fn run<F, R>(&self, mut f: F) -> BenchmarkResult
    where
        F: FnMut() -> R,
    {
        for _ in 0..self.warmup_iterations {
            black_box(f());
        }

        let mut durations = Vec::with_capacity(self.iterations);
        for _ in 0..self.iterations {
            let start = Instant::now();
            black_box(f());
            durations.push(start.elapsed());
        }

        BenchmarkResult {
            name: self.name.clone(),
            durations,
        }
    }
}

struct BenchmarkResult {
    name: String,
    durations: Vec<Duration>,
}

impl BenchmarkResult {
    fn report(&self) {
        if self.durations.is_empty() {
            return;
        }
        let total: Duration = self.durations.iter().sum();
        let avg = total / self.durations.len() as u32;

        let mut sorted = self.durations.clone();
        sorted.sort();
        let p50 = sorted[sorted.len() / 2];
        let p99 = sorted[(sorted.len() * 99) / 100];

        println!("\n=== {} ===", self.name);
        println!("Iterations: {}", self.durations.len());
        println!("Average: {:?}", avg);
        println!("Min:     {:?}", sorted[0]);
        println!("Max:     {:?}", sorted[sorted.len() - 1]);
        println!("P50:     {:?}", p50);
        println!("P99:     {:?}", p99);
    }
}

fn bench_config(heap_size: usize, mode: HeapMode) -> StateHeapConfig {
    StateHeapConfig::new()
        .with_mode(mode)
        .with_kernel_heap(KernelHeapConfig {
            initial_size: heap_size,
            increment: heap_size,
            max_size: heap_size * 4,
            block_alignment: 64,
        })
        .with_media_states(MediaStateConfig {
            count: 16,
            max_count: 16,
            ..MediaStateConfig::default()
        })
}

// ============================================================================
// Hash Table Benchmarks
// ============================================================================

fn benchmark_hash_table() {
    println!("\n[Coalesced Hash Table]");
    println!("======================");

    for count in [128i32, 1024, 4000] {
        let bench = Benchmark::new(&format!("register {} kernels", count), 100);
        bench
            .run(|| {
                let mut table = CoalescedHashTable::new(128, 64, 4096).unwrap();
                for i in 0..count {
                    table.register(i, 0, i as u32).unwrap();
                }
                table.extend_count()
            })
            .report();
    }

    let mut table = CoalescedHashTable::new(128, 64, 4096).unwrap();
    for i in 0..4000 {
        table.register(i, i % 4, i as u32).unwrap();
    }
    Benchmark::new("search 4000 kernels (exact)", 100)
        .run(|| (0..4000).filter_map(|i| table.get(i, i % 4)).count())
        .report();
    Benchmark::new("search 4000 kernels (wildcard)", 100)
        .run(|| {
            (0..4000)
                .filter_map(|i| table.search(i, -1, &mut SearchCursor::Start))
                .count()
        })
        .report();
}

// ============================================================================
// Kernel Cache Benchmarks
// ============================================================================

fn benchmark_kernel_load() {
    println!("\n[Kernel Load]");
    println!("=============");

    let binary = vec![0x5Au8; 1024];
    let fence = Arc::new(FenceProgress::new());
    let mut heap = StateHeap::new(bench_config(1024 * 1024, HeapMode::Dynamic), fence).unwrap();
    for uid in 0..256 {
        heap.load_kernel(&KernelBinary::new(uid, 0, &binary)).unwrap();
    }

    Benchmark::new("load 256 resident kernels (hits)", 200)
        .run(|| {
            for uid in 0..256 {
                heap.load_kernel(&KernelBinary::new(uid, 0, &binary)).unwrap();
            }
        })
        .report();

    // 64 slots, 256 distinct kernels: every load evicts
    let fence = Arc::new(FenceProgress::new());
    let mut small = StateHeap::new(bench_config(64 * 1024, HeapMode::FixedSlot), fence).unwrap();
    let mut next = 0;
    Benchmark::new("load with eviction (full heap)", 200)
        .run(|| {
            for _ in 0..64 {
                small
                    .load_kernel(&KernelBinary::new(next % 256, 0, &binary))
                    .unwrap();
                next += 1;
            }
        })
        .report();

    let stats = small.stats();
    println!(
        "  evictions: {}, hits: {}, misses: {}",
        stats.registry.evictions, stats.registry.hits, stats.registry.misses
    );
}

// ============================================================================
// Media State Benchmarks
// ============================================================================

fn benchmark_media_state_cycle() {
    println!("\n[Media State Cycle]");
    println!("===================");

    let binary = vec![1u8; 512];
    let fence = Arc::new(FenceProgress::new());
    let mut heap =
        StateHeap::new(bench_config(256 * 1024, HeapMode::Dynamic), fence.clone()).unwrap();
    let kernels: Vec<_> = (0..8)
        .map(|uid| heap.load_kernel(&KernelBinary::new(uid, 0, &binary)).unwrap())
        .collect();

    Benchmark::new("assign + bind 8 + submit + retire", 1000)
        .run(|| {
            let state = heap.assign_media_state(ComponentId::VideoProcessing).unwrap();
            for (slot, kernel) in kernels.iter().enumerate() {
                heap.bind_kernel(state, slot, *kernel).unwrap();
            }
            let token = heap.submit(state).unwrap();
            fence.signal(token);
            token
        })
        .report();

    heap.refresh_sync().unwrap();
    println!("  media states created: {}", heap.stats().media_states_total);
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    println!("====================================");
    println!("renderheap State Heap Benchmark Suite");
    println!("====================================");

    benchmark_hash_table();
    benchmark_kernel_load();
    benchmark_media_state_cycle();

    println!("\n====================================");
    println!("Benchmark Complete");
    println!("====================================");
}

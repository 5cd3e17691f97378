//! Deterministic set-associative cache model.
//!
//! Stands in for real hardware when exercising the detection pipeline. A cyclic walk over more
//! lines than a set can hold misses on every access under LRU, so the model only asks whether
//! any set is oversubscribed: latency is `miss` per load if so, `hit` per load otherwise. The
//! permutation order is irrelevant to that question, which makes the model fully repeatable.
use crate::error::Result;
use crate::probe::{ChaseLayout, LatencyProbe};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimulatedCache {
    capacity: usize,
    associativity: usize,
    line_size: usize,
    hit: Duration,
    miss: Duration,
    probes: usize,
}

impl SimulatedCache {
    /// Model with 1 ns hits and 4 ns misses.
    ///
    /// `capacity` must be a multiple of `associativity * line_size`.
    pub fn new(capacity: usize, associativity: usize, line_size: usize) -> Self {
        SimulatedCache {
            capacity,
            associativity,
            line_size,
            hit: Duration::from_nanos(1),
            miss: Duration::from_nanos(4),
            probes: 0,
        }
    }

    pub fn with_latencies(mut self, hit: Duration, miss: Duration) -> Self {
        self.hit = hit;
        self.miss = miss;
        self
    }

    pub fn sets(&self) -> usize {
        (self.capacity / (self.associativity * self.line_size)).max(1)
    }

    /// Number of `measure` calls served so far
    pub fn probes(&self) -> usize {
        self.probes
    }

    /// Whether walking `layout` oversubscribes at least one set
    pub fn evicts(&self, layout: ChaseLayout) -> bool {
        let sets = self.sets();
        let lines: HashSet<usize> = (0..layout.blocks())
            .map(|block| block * layout.stride() / self.line_size)
            .collect();

        let mut occupancy: HashMap<usize, usize> = HashMap::new();
        lines.into_iter().any(|line| {
            let count = occupancy.entry(line % sets).or_insert(0);
            *count += 1;
            *count > self.associativity
        })
    }
}

impl LatencyProbe for SimulatedCache {
    fn measure(&mut self, layout: ChaseLayout, iterations: u64) -> Result<Duration> {
        self.probes += 1;
        let per_load = if self.evicts(layout) {
            self.miss
        } else {
            self.hit
        };
        Ok(per_load * u32::try_from(iterations).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(stride: usize, blocks: usize) -> ChaseLayout {
        ChaseLayout::new(stride, blocks).unwrap()
    }

    #[test]
    fn one_set_holds_exactly_associativity_lines() {
        let cache = SimulatedCache::new(32 * 1024, 8, 64);
        assert_eq!(cache.sets(), 64);
        assert!(!cache.evicts(layout(4096, 8)));
        assert!(cache.evicts(layout(4096, 9)));
    }

    #[test]
    fn blocks_sharing_a_line_cost_nothing_extra() {
        let cache = SimulatedCache::new(32 * 1024, 8, 64);
        // 2048 blocks of 16 B fill exactly 512 lines spread over all sets
        assert!(!cache.evicts(layout(16, 2048)));
        assert!(cache.evicts(layout(16, 2049)));
    }

    #[test]
    fn latency_scales_with_iterations() {
        let mut cache = SimulatedCache::new(32 * 1024, 8, 64);
        let fast = cache.measure(layout(64, 8), 1000).unwrap();
        let slow = cache.measure(layout(4096, 64), 1000).unwrap();
        assert_eq!(fast, Duration::from_micros(1));
        assert_eq!(slow, Duration::from_micros(4));
        assert_eq!(cache.probes(), 2);
    }
}

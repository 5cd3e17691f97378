//! # Associativity and capacity search
//!
//! Doubles the stride H from `min_stride` and, for each H, sweeps the working set from one block
//! upwards until latency jumps. At small strides every stride aliases into the same sets, so the
//! jump reflects the total capacity and halves each time H doubles. Once H reaches the way size,
//! all blocks land in one set and the jump stays put at `associativity + 1` blocks. The first
//! stride whose jump stops halving marks the previous stride as stable.
use crate::config::{DetectorConfig, SweepLimits};
use crate::error::{Result, Undetermined};
use crate::format_size;
use crate::history::{JumpHistory, JumpPoint};
use crate::jump::JumpDetector;
use crate::probe::{ChaseLayout, LatencyProbe};
use log::{debug, info};
use serde::Serialize;

/// Associativity and the stride at which it was observed. Capacity is derived from both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CacheShape {
    pub associativity: usize,
    pub stable_stride: usize,
}

impl CacheShape {
    pub fn capacity_bytes(&self) -> usize {
        self.associativity * self.stable_stride
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacitySearch {
    detector: JumpDetector,
    limits: SweepLimits,
    movement_tolerance: f64,
    iterations: u64,
}

impl CapacitySearch {
    pub fn new(
        detector: JumpDetector,
        limits: SweepLimits,
        movement_tolerance: f64,
        iterations: u64,
    ) -> Self {
        CapacitySearch {
            detector,
            limits,
            movement_tolerance,
            iterations,
        }
    }

    pub fn from_config(config: &DetectorConfig, iterations: u64) -> Self {
        Self::new(
            JumpDetector::new(config.jump_ratio),
            config.sweep,
            config.movement_tolerance,
            iterations,
        )
    }

    /// Whether the sweep at `stride` is still inside the configured ceilings
    fn in_range(&self, stride: usize) -> bool {
        stride <= self.limits.max_stride
            && stride
                .checked_mul(self.limits.max_blocks)
                .is_some_and(|size| size <= self.limits.max_buffer_size)
    }

    /// First working set at `stride` whose latency jumps, if any
    pub fn jump_at_stride<P: LatencyProbe>(
        &self,
        probe: &mut P,
        stride: usize,
    ) -> Result<Option<usize>> {
        self.detector
            .first_jump(1..=self.limits.max_blocks, |blocks| {
                probe.measure(ChaseLayout::new(stride, blocks)?, self.iterations)
            })
    }

    /// Run the stride sweep, appending every jump found to `history`.
    pub fn run<P: LatencyProbe>(
        &self,
        probe: &mut P,
        history: &mut JumpHistory,
    ) -> Result<CacheShape> {
        let mut stride = self.limits.min_stride;

        while self.in_range(stride) {
            let Some(blocks) = self.jump_at_stride(probe, stride)? else {
                debug!("stride {stride} B: no jump up to {} blocks", self.limits.max_blocks);
                stride *= 2;
                continue;
            };
            debug!("stride {stride} B: jump at {blocks} blocks");
            history.record(JumpPoint { stride, blocks });

            if !history.is_moving(stride, self.limits.min_stride, self.movement_tolerance) {
                let stable_stride = stride / 2;
                // is_moving only reports a standstill when both strides have a jump on record
                if let Some(stable_jump) = history.latest_for_stride(stable_stride) {
                    let shape = CacheShape {
                        associativity: stable_jump - 1,
                        stable_stride,
                    };
                    info!(
                        "jump settled at stride {stable_stride} B: {}-way, {}",
                        shape.associativity,
                        format_size(shape.capacity_bytes() as f32)
                    );
                    return Ok(shape);
                }
            }

            stride *= 2;
        }

        Err(Undetermined::Associativity {
            max_stride: self.limits.max_stride,
        }
        .into())
    }
}

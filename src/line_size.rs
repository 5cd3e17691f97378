//! # Line size search
//!
//! For each candidate line size L (powers of two from `min_line_size` up to the stable stride),
//! the working-set jump at stride L is compared with the jump at the offset stride `L + L/2`.
//!
//! While L is below the true line size, several blocks share a line at both strides and the
//! offset stride packs fewer blocks per line, so its jump comes about a third earlier. Once L
//! reaches the line size, every block owns its line at both strides and the two jumps coincide
//! (or the offset one comes later, as it no longer aliases into a subset of the sets). The line
//! size is the first candidate where the earlier eviction disappears.
use crate::capacity::CacheShape;
use crate::config::{DetectorConfig, RetryPolicy};
use crate::error::{Error, Result, Undetermined};
use crate::jump::JumpDetector;
use crate::probe::{ChaseLayout, LatencyProbe};
use log::{debug, info, warn};

/// How the offset stride's jump point compares with the base stride's
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetEffect {
    /// Offset stride evicts with fewer blocks: candidate is still below the line size
    EarlierEviction,
    /// Both jumps agree within tolerance
    NoEffect,
    /// Offset stride evicts with more blocks
    LaterEviction,
}

impl OffsetEffect {
    fn ends_earlier_run(self) -> bool {
        matches!(self, OffsetEffect::NoEffect | OffsetEffect::LaterEviction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSizeSearch {
    detector: JumpDetector,
    min_line_size: usize,
    tolerance: f64,
    max_buffer_size: usize,
    retry: RetryPolicy,
    iterations: u64,
}

impl LineSizeSearch {
    pub fn from_config(config: &DetectorConfig, iterations: u64) -> Self {
        LineSizeSearch {
            detector: JumpDetector::new(config.jump_ratio),
            min_line_size: config.min_line_size,
            tolerance: config.line_tolerance,
            max_buffer_size: config.sweep.max_buffer_size,
            retry: config.line_retry,
            iterations,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Largest working set worth sweeping at `stride`.
    ///
    /// No stride at or above `min_line_size` can hold more than `capacity / min_line_size`
    /// blocks, so twice that always brackets the jump.
    fn sweep_limit(&self, stride: usize, capacity: usize) -> usize {
        let blocks = capacity.saturating_mul(2) / self.min_line_size;
        blocks.min(self.max_buffer_size / stride)
    }

    /// Working-set jump at `stride`, swept far enough for a cache of `capacity` bytes
    pub fn jump_at_stride<P: LatencyProbe>(
        &self,
        probe: &mut P,
        stride: usize,
        capacity: usize,
    ) -> Result<Option<usize>> {
        self.detector
            .first_jump_bracketed(self.sweep_limit(stride, capacity), |blocks| {
                probe.measure(ChaseLayout::new(stride, blocks)?, self.iterations)
            })
    }

    pub fn compare(&self, base: usize, offset: usize) -> OffsetEffect {
        let ratio = offset as f64 / base as f64;
        if ratio < 1.0 - self.tolerance {
            OffsetEffect::EarlierEviction
        } else if ratio > 1.0 + self.tolerance {
            OffsetEffect::LaterEviction
        } else {
            OffsetEffect::NoEffect
        }
    }

    /// Classify candidate `line`, or `None` if either stride shows no jump
    pub fn classify<P: LatencyProbe>(
        &self,
        probe: &mut P,
        line: usize,
        capacity: usize,
    ) -> Result<Option<OffsetEffect>> {
        let Some(base) = self.jump_at_stride(probe, line, capacity)? else {
            return Ok(None);
        };
        let Some(offset) = self.jump_at_stride(probe, line + line / 2, capacity)? else {
            return Ok(None);
        };
        let effect = self.compare(base, offset);
        debug!("line candidate {line} B: base jump {base}, offset jump {offset} -> {effect:?}");
        Ok(Some(effect))
    }

    /// One pass over the candidates, returning the first L that ends a run of earlier evictions
    fn sweep<P: LatencyProbe>(
        &self,
        probe: &mut P,
        max_candidate: usize,
        capacity: usize,
    ) -> Result<Option<usize>> {
        let mut previous = None;
        let mut line = self.min_line_size;
        while line <= max_candidate {
            let effect = self.classify(probe, line, capacity)?;
            if previous == Some(OffsetEffect::EarlierEviction)
                && effect.is_some_and(OffsetEffect::ends_earlier_run)
            {
                return Ok(Some(line));
            }
            previous = effect;
            line *= 2;
        }
        Ok(None)
    }

    /// Re-measure both sides of the transition with fresh permutations
    fn confirm<P: LatencyProbe>(&self, probe: &mut P, line: usize, capacity: usize) -> Result<bool> {
        let below = self.classify(probe, line / 2, capacity)?;
        let at = self.classify(probe, line, capacity)?;
        Ok(below == Some(OffsetEffect::EarlierEviction)
            && at.is_some_and(OffsetEffect::ends_earlier_run))
    }

    /// Line size in bytes for a cache of the given shape
    pub fn run<P: LatencyProbe>(&self, probe: &mut P, shape: CacheShape) -> Result<usize> {
        let capacity = shape.capacity_bytes();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let Some(line) = self.sweep(probe, shape.stable_stride, capacity)? else {
                return Err(Undetermined::LineSize {
                    max_candidate: shape.stable_stride,
                }
                .into());
            };
            if self.confirm(probe, line, capacity)? {
                info!("line size {line} B confirmed");
                return Ok(line);
            }
            if !self.retry.permits_another(attempts) {
                return Err(Error::MeasurementDisagreement { attempts });
            }
            warn!("line size {line} B failed confirmation, restarting sweep");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedCache;
    use std::time::Duration;

    const SHAPE: CacheShape = CacheShape {
        associativity: 8,
        stable_stride: 4096,
    };

    fn search() -> LineSizeSearch {
        LineSizeSearch::from_config(&DetectorConfig::default(), 1_000)
    }

    /// Serves `first` for a fixed number of probes, then `second`
    struct Switching {
        first: SimulatedCache,
        second: SimulatedCache,
        switch_after: usize,
        calls: usize,
    }

    impl LatencyProbe for Switching {
        fn measure(&mut self, layout: ChaseLayout, iterations: u64) -> Result<Duration> {
            self.calls += 1;
            if self.calls <= self.switch_after {
                self.first.measure(layout, iterations)
            } else {
                self.second.measure(layout, iterations)
            }
        }
    }

    #[test]
    fn recovers_simulated_line_sizes() {
        for line in [32, 64, 128] {
            let mut cache = SimulatedCache::new(32 * 1024, 8, line);
            assert_eq!(search().run(&mut cache, SHAPE).unwrap(), line);
        }
    }

    #[test]
    fn offset_jumps_earlier_below_line_size() {
        let mut cache = SimulatedCache::new(32 * 1024, 8, 64);
        let capacity = SHAPE.capacity_bytes();
        assert_eq!(
            search().jump_at_stride(&mut cache, 16, capacity).unwrap(),
            Some(2049)
        );
        assert_eq!(
            search().jump_at_stride(&mut cache, 24, capacity).unwrap(),
            Some(1367)
        );
        assert_eq!(
            search().classify(&mut cache, 16, capacity).unwrap(),
            Some(OffsetEffect::EarlierEviction)
        );
        assert_eq!(
            search().classify(&mut cache, 64, capacity).unwrap(),
            Some(OffsetEffect::NoEffect)
        );
    }

    #[test]
    fn tolerance_band_is_relative() {
        let search = search();
        assert_eq!(search.compare(100, 91), OffsetEffect::NoEffect);
        assert_eq!(search.compare(100, 109), OffsetEffect::NoEffect);
        assert_eq!(search.compare(100, 67), OffsetEffect::EarlierEviction);
        assert_eq!(search.compare(100, 200), OffsetEffect::LaterEviction);
    }

    #[test]
    fn no_transition_is_undetermined() {
        // 16 B lines never show an earlier eviction from 16 B upwards
        let mut cache = SimulatedCache::new(32 * 1024, 8, 16);
        let err = search().run(&mut cache, SHAPE).unwrap_err();
        assert_eq!(
            err,
            Error::from(Undetermined::LineSize { max_candidate: 4096 })
        );
    }

    fn switching_probe() -> Switching {
        let capacity = SHAPE.capacity_bytes();
        let mut dry_run = SimulatedCache::new(32 * 1024, 8, 64);
        search().sweep(&mut dry_run, 4096, capacity).unwrap();
        Switching {
            first: SimulatedCache::new(32 * 1024, 8, 64),
            second: SimulatedCache::new(32 * 1024, 8, 128),
            switch_after: dry_run.probes(),
            calls: 0,
        }
    }

    #[test]
    fn failed_confirmation_restarts_the_sweep() {
        // the sweep sees 64 B lines, the confirmation already sees 128 B lines
        let mut probe = switching_probe();
        assert_eq!(search().run(&mut probe, SHAPE).unwrap(), 128);
    }

    #[test]
    fn bounded_restarts_surface_disagreement() {
        let mut probe = switching_probe();
        let err = search()
            .with_retry(RetryPolicy::MaxAttempts(1))
            .run(&mut probe, SHAPE)
            .unwrap_err();
        assert_eq!(err, Error::MeasurementDisagreement { attempts: 1 });
    }
}

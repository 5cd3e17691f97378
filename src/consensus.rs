//! # Consensus across detection passes
//!
//! A single pass can be fooled by noise, so results are only accepted when independent passes
//! agree. Two strategies are available and exactly one is used per run:
//!
//! - `SanityCheck`: run twice, require identical estimates, otherwise double the iteration count
//!   and try again.
//! - `Majority`: run three times and take each field's value when at least two passes agree on
//!   it. If any field has three different values the whole set is thrown away and three fresh
//!   passes run with the same iteration count. Partial agreement from a rejected set is never
//!   reused.
use crate::config::{ConsensusMode, DetectorConfig, RetryPolicy};
use crate::error::{ConfigError, Error, Result};
use crate::geometry::GeometryEstimate;
use log::{info, warn};

/// Something that can run one complete detection pass
pub trait DetectionPass {
    fn run_pass(&mut self, iterations: u64) -> Result<GeometryEstimate>;
}

impl<D: DetectionPass + ?Sized> DetectionPass for &mut D {
    fn run_pass(&mut self, iterations: u64) -> Result<GeometryEstimate> {
        (**self).run_pass(iterations)
    }
}

/// Accepted estimate and how much work it took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consensus {
    pub estimate: GeometryEstimate,
    /// Number of pass sets run, including the accepted one
    pub tries: u32,
    /// Iteration count of the accepted set
    pub iterations: u64,
}

/// Value held by at least two of the three votes
pub fn vote<T: PartialEq + Copy>(a: T, b: T, c: T) -> Option<T> {
    if a == b || a == c {
        Some(a)
    } else if b == c {
        Some(b)
    } else {
        None
    }
}

/// Field-wise majority over three estimates, `None` if any field has no majority
pub fn majority(runs: &[GeometryEstimate; 3]) -> Option<GeometryEstimate> {
    let [a, b, c] = runs;
    Some(GeometryEstimate {
        associativity: vote(a.associativity, b.associativity, c.associativity)?,
        stable_stride: vote(a.stable_stride, b.stable_stride, c.stable_stride)?,
        line_size: vote(a.line_size, b.line_size, c.line_size)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusOrchestrator {
    mode: ConsensusMode,
    retry: RetryPolicy,
}

impl ConsensusOrchestrator {
    pub fn new(mode: ConsensusMode, retry: RetryPolicy) -> Self {
        ConsensusOrchestrator { mode, retry }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(config.consensus, config.retry)
    }

    pub fn mode(&self) -> ConsensusMode {
        self.mode
    }

    /// Run passes until they agree, starting at `iterations` per probe
    pub fn run<D: DetectionPass>(&self, detector: &mut D, iterations: u64) -> Result<Consensus> {
        match self.mode {
            ConsensusMode::SanityCheck => self.run_sanity_check(detector, iterations),
            ConsensusMode::Majority => self.run_majority(detector, iterations),
        }
    }

    fn run_sanity_check<D: DetectionPass>(
        &self,
        detector: &mut D,
        mut iterations: u64,
    ) -> Result<Consensus> {
        let mut tries = 0;
        loop {
            tries += 1;
            let first = detector.run_pass(iterations)?;
            let second = detector.run_pass(iterations)?;
            if first == second {
                info!("passes agree after {tries} tries at {iterations} iterations");
                return Ok(Consensus {
                    estimate: first,
                    tries,
                    iterations,
                });
            }
            if !self.retry.permits_another(tries) {
                return Err(Error::MeasurementDisagreement { attempts: tries });
            }
            iterations = iterations
                .checked_mul(2)
                .ok_or_else(|| ConfigError::InvalidParameter {
                    name: "iterations",
                    reason: "iteration count overflowed while escalating".into(),
                })?;
            warn!("passes disagree ({first:?} vs {second:?}), escalating to {iterations} iterations");
        }
    }

    fn run_majority<D: DetectionPass>(&self, detector: &mut D, iterations: u64) -> Result<Consensus> {
        let mut tries = 0;
        loop {
            tries += 1;
            let runs = [
                detector.run_pass(iterations)?,
                detector.run_pass(iterations)?,
                detector.run_pass(iterations)?,
            ];
            if let Some(estimate) = majority(&runs) {
                info!("majority reached after {tries} tries");
                return Ok(Consensus {
                    estimate,
                    tries,
                    iterations,
                });
            }
            if !self.retry.permits_another(tries) {
                return Err(Error::MeasurementDisagreement { attempts: tries });
            }
            warn!("no majority across {runs:?}, restarting");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn estimate(associativity: usize, stable_stride: usize, line_size: usize) -> GeometryEstimate {
        GeometryEstimate {
            associativity: Some(associativity),
            stable_stride: Some(stable_stride),
            line_size: Some(line_size),
        }
    }

    /// Replays a fixed list of pass results and records the iterations requested
    struct Scripted {
        results: VecDeque<GeometryEstimate>,
        requested: Vec<u64>,
    }

    impl Scripted {
        fn new(results: impl IntoIterator<Item = GeometryEstimate>) -> Self {
            Scripted {
                results: results.into_iter().collect(),
                requested: Vec::new(),
            }
        }
    }

    impl DetectionPass for Scripted {
        fn run_pass(&mut self, iterations: u64) -> Result<GeometryEstimate> {
            self.requested.push(iterations);
            Ok(self.results.pop_front().expect("script ran out of passes"))
        }
    }

    #[test]
    fn vote_needs_two_of_three() {
        assert_eq!(vote(1, 1, 2), Some(1));
        assert_eq!(vote(2, 1, 1), Some(1));
        assert_eq!(vote(1, 2, 1), Some(1));
        assert_eq!(vote(1, 2, 3), None);
    }

    #[test]
    fn majority_takes_the_agreeing_value_per_field() {
        let mut detector = Scripted::new([
            estimate(8, 4096, 64),
            estimate(8, 4096, 128),
            estimate(8, 4096, 64),
        ]);
        let consensus = ConsensusOrchestrator::new(ConsensusMode::Majority, RetryPolicy::UntilAgreement)
            .run(&mut detector, 1_000)
            .unwrap();
        assert_eq!(consensus.estimate, estimate(8, 4096, 64));
        assert_eq!(consensus.tries, 1);
        assert_eq!(detector.requested.len(), 3);
    }

    #[test]
    fn three_way_disagreement_restarts_from_scratch() {
        let mut detector = Scripted::new([
            // line size splits three ways: the whole set is discarded
            estimate(8, 4096, 32),
            estimate(8, 4096, 64),
            estimate(8, 4096, 128),
            estimate(12, 4096, 64),
            estimate(12, 4096, 64),
            estimate(8, 4096, 64),
        ]);
        let consensus = ConsensusOrchestrator::new(ConsensusMode::Majority, RetryPolicy::UntilAgreement)
            .run(&mut detector, 1_000)
            .unwrap();
        // the 8-way votes from the rejected set do not count
        assert_eq!(consensus.estimate, estimate(12, 4096, 64));
        assert_eq!(consensus.tries, 2);
        assert_eq!(detector.requested, vec![1_000; 6]);
    }

    #[test]
    fn undetermined_majority_stays_undetermined() {
        let undetermined_line = GeometryEstimate {
            line_size: None,
            ..estimate(8, 4096, 0)
        };
        let mut detector = Scripted::new([undetermined_line, estimate(8, 4096, 64), undetermined_line]);
        let consensus = ConsensusOrchestrator::new(ConsensusMode::Majority, RetryPolicy::UntilAgreement)
            .run(&mut detector, 1_000)
            .unwrap();
        assert_eq!(consensus.estimate.line_size, None);
        assert_eq!(consensus.estimate.capacity_bytes(), Some(32768));
    }

    #[test]
    fn bounded_majority_gives_up() {
        let mut detector = Scripted::new([
            estimate(4, 4096, 64),
            estimate(8, 4096, 64),
            estimate(12, 4096, 64),
        ]);
        let err = ConsensusOrchestrator::new(ConsensusMode::Majority, RetryPolicy::MaxAttempts(1))
            .run(&mut detector, 1_000)
            .unwrap_err();
        assert_eq!(err, Error::MeasurementDisagreement { attempts: 1 });
    }

    #[test]
    fn sanity_check_escalates_iterations_on_mismatch() {
        let mut detector = Scripted::new([
            estimate(8, 4096, 64),
            estimate(8, 2048, 64),
            estimate(8, 4096, 64),
            estimate(8, 4096, 64),
        ]);
        let consensus =
            ConsensusOrchestrator::new(ConsensusMode::SanityCheck, RetryPolicy::UntilAgreement)
                .run(&mut detector, 1_000)
                .unwrap();
        assert_eq!(consensus.estimate, estimate(8, 4096, 64));
        assert_eq!(consensus.tries, 2);
        assert_eq!(consensus.iterations, 2_000);
        assert_eq!(detector.requested, vec![1_000, 1_000, 2_000, 2_000]);
    }
}

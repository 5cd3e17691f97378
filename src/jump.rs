//! # Jump detection
//!
//! Cache-resident working sets show near-flat latency; crossing a cache resource boundary shows
//! up as a sharp multiplicative step. A jump is declared when a sample is at least `ratio` times
//! the immediately preceding sample, so the absolute clock scale does not matter.
use crate::config::DEFAULT_JUMP_RATIO;
use crate::error::Result;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JumpDetector {
    ratio: f64,
}

impl Default for JumpDetector {
    fn default() -> Self {
        JumpDetector::new(DEFAULT_JUMP_RATIO)
    }
}

impl JumpDetector {
    pub fn new(ratio: f64) -> Self {
        JumpDetector { ratio }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Whether `current` is a jump relative to `previous`. A zero baseline never jumps.
    pub fn is_jump(&self, previous: Duration, current: Duration) -> bool {
        if previous.is_zero() {
            return false;
        }
        current.as_secs_f64() / previous.as_secs_f64() >= self.ratio
    }

    /// Sample each point in order and return the first one that jumps relative to its
    /// predecessor, or `None` when the whole sweep stays flat.
    pub fn first_jump<I, F>(&self, points: I, mut sample: F) -> Result<Option<usize>>
    where
        I: IntoIterator<Item = usize>,
        F: FnMut(usize) -> Result<Duration>,
    {
        let mut previous: Option<Duration> = None;
        for point in points {
            let current = sample(point)?;
            if let Some(prev) = previous {
                if self.is_jump(prev, current) {
                    return Ok(Some(point));
                }
            }
            previous = Some(current);
        }
        Ok(None)
    }

    /// Same answer as a linear sweep over `1..=limit` for a step profile, with far fewer samples.
    ///
    /// Samples 1, 2, 4, ... (the last step capped at `limit`) until one doubling crosses the
    /// ratio, then runs the linear sweep between the two bracketing points. If the linear pass
    /// finds no single step large enough (a gradual rise), the upper bracket is reported.
    pub fn first_jump_bracketed<F>(&self, limit: usize, mut sample: F) -> Result<Option<usize>>
    where
        F: FnMut(usize) -> Result<Duration>,
    {
        if limit < 2 {
            return Ok(None);
        }
        let mut low = 1;
        let mut previous = sample(low)?;
        while low < limit {
            let high = low.saturating_mul(2).min(limit);
            let current = sample(high)?;
            if self.is_jump(previous, current) {
                let refined = self.first_jump(low..=high, &mut sample)?;
                return Ok(refined.or(Some(high)));
            }
            low = high;
            previous = current;
        }
        Ok(None)
    }
}

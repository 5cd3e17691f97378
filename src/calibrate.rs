//! # Iteration calibration
//!
//! A short pointer chase is dominated by fixed overhead and scheduler noise, and the 1.3x jump
//! ratio only means something once repeated measurements agree much more tightly than that.
//! Starting from a floor, the iteration count doubles until `repetitions` probes of a small,
//! cache-resident reference layout stay within `max_spread` (max/min) of each other.
use crate::config::CalibrationConfig;
use crate::error::{ConfigError, Error, Result};
use crate::probe::{ChaseLayout, LatencyProbe};
use log::{debug, info};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityCalibrator {
    config: CalibrationConfig,
}

/// Ratio between the slowest and fastest sample. An all-zero set is perfectly stable, a zero
/// minimum next to a non-zero sample is not.
pub fn spread(samples: &[Duration]) -> f64 {
    let (Some(min), Some(max)) = (samples.iter().min(), samples.iter().max()) else {
        return f64::INFINITY;
    };
    if max.is_zero() {
        1.0
    } else if min.is_zero() {
        f64::INFINITY
    } else {
        max.as_secs_f64() / min.as_secs_f64()
    }
}

impl StabilityCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        StabilityCalibrator { config }
    }

    /// Spread of `repetitions` probes of the reference layout at `iterations`
    pub fn measure_spread<P: LatencyProbe>(&self, probe: &mut P, iterations: u64) -> Result<f64> {
        let layout = ChaseLayout::new(self.config.reference_stride, self.config.reference_blocks)?;
        let samples = (0..self.config.repetitions)
            .map(|_| probe.measure(layout, iterations))
            .collect::<Result<Vec<_>>>()?;
        Ok(spread(&samples))
    }

    /// Smallest doubling of the floor iteration count whose measurements agree
    pub fn calibrate<P: LatencyProbe>(&self, probe: &mut P) -> Result<u64> {
        let mut iterations = self.config.floor_iterations;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let spread = self.measure_spread(probe, iterations)?;
            if spread <= self.config.max_spread {
                info!("{iterations} iterations per probe (spread {spread:.3})");
                return Ok(iterations);
            }
            debug!("{iterations} iterations: spread {spread:.3} too wide");

            if !self.config.retry.permits_another(attempts) {
                return Err(Error::MeasurementDisagreement { attempts });
            }
            iterations = iterations
                .checked_mul(2)
                .ok_or_else(|| ConfigError::InvalidParameter {
                    name: "calibration.floor_iterations",
                    reason: "iteration count overflowed while doubling".into(),
                })?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;

    /// Alternates between two latencies whose gap shrinks as iterations grow
    struct Noisy {
        settles_at: u64,
        calls: u64,
    }

    impl LatencyProbe for Noisy {
        fn measure(&mut self, _layout: ChaseLayout, iterations: u64) -> Result<Duration> {
            self.calls += 1;
            let base = Duration::from_nanos(iterations);
            let jitter = if iterations >= self.settles_at { 1.01 } else { 1.2 };
            Ok(if self.calls % 2 == 0 { base.mul_f64(jitter) } else { base })
        }
    }

    fn calibrator(retry: RetryPolicy) -> StabilityCalibrator {
        StabilityCalibrator::new(CalibrationConfig {
            repetitions: 10,
            retry,
            ..CalibrationConfig::default()
        })
    }

    #[test]
    fn doubles_until_measurements_agree() {
        let mut probe = Noisy {
            settles_at: 3_000_000,
            calls: 0,
        };
        let iterations = calibrator(RetryPolicy::UntilAgreement)
            .calibrate(&mut probe)
            .unwrap();
        assert_eq!(iterations, 4_000_000);
        assert_eq!(probe.calls, 30);
    }

    #[test]
    fn stable_probe_keeps_the_floor() {
        let mut probe = Noisy {
            settles_at: 0,
            calls: 0,
        };
        let iterations = calibrator(RetryPolicy::UntilAgreement)
            .calibrate(&mut probe)
            .unwrap();
        assert_eq!(iterations, 1_000_000);
    }

    #[test]
    fn bounded_calibration_gives_up() {
        let mut probe = Noisy {
            settles_at: u64::MAX,
            calls: 0,
        };
        let err = calibrator(RetryPolicy::MaxAttempts(3))
            .calibrate(&mut probe)
            .unwrap_err();
        assert_eq!(err, Error::MeasurementDisagreement { attempts: 3 });
    }

    #[test]
    fn spread_edge_cases() {
        assert_eq!(spread(&[]), f64::INFINITY);
        assert_eq!(spread(&[Duration::ZERO, Duration::ZERO]), 1.0);
        assert_eq!(spread(&[Duration::ZERO, Duration::from_nanos(1)]), f64::INFINITY);
        let ratio = spread(&[Duration::from_nanos(100), Duration::from_nanos(105)]);
        assert!((ratio - 1.05).abs() < 1e-9);
    }
}

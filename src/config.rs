//! # Detector configuration
//!
//! Every knob the detection pipeline depends on lives here, with defaults that
//! match the usual desktop setup: 10 MiB buffer ceiling, 128 blocks per sweep,
//! strides up to 1 GiB and a 1.3x jump ratio.
use crate::error::ConfigError;
use crate::probe::POINTER_WIDTH;

/// Pointer-chase iterations per probe when calibration is skipped
pub const DEFAULT_ITERATIONS: u64 = 10_000_000;

/// Latency ratio between consecutive samples that counts as a jump
pub const DEFAULT_JUMP_RATIO: f64 = 1.3;

/// How many attempts a retrying stage may make before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Keep retrying until results agree. A disagreeing result is never surfaced.
    #[default]
    UntilAgreement,
    /// Give up with `Error::MeasurementDisagreement` after this many attempts
    MaxAttempts(u32),
}

impl RetryPolicy {
    /// Whether another attempt may start after `attempts` have already run
    pub fn permits_another(&self, attempts: u32) -> bool {
        match self {
            RetryPolicy::UntilAgreement => true,
            RetryPolicy::MaxAttempts(max) => attempts < *max,
        }
    }
}

/// Agreement strategy across repeated detection passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsensusMode {
    /// Two passes must match exactly; on mismatch double the iteration count and retry
    SanityCheck,
    /// Three passes, each field accepted when at least two agree; otherwise restart unchanged
    #[default]
    Majority,
}

/// Ceilings for the stride and working-set sweeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepLimits {
    /// First stride tried by the associativity search, in bytes
    pub min_stride: usize,
    /// Largest stride the associativity search may reach, in bytes
    pub max_stride: usize,
    /// Largest working set swept per stride, in blocks
    pub max_blocks: usize,
    /// Upper bound on `stride * blocks` for any single probe
    pub max_buffer_size: usize,
}

impl Default for SweepLimits {
    fn default() -> Self {
        SweepLimits {
            min_stride: 16,
            max_stride: 1024 * 1024 * 1024,
            max_blocks: 128,
            max_buffer_size: 10 * 1024 * 1024,
        }
    }
}

/// Reference workload and acceptance criterion for iteration calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationConfig {
    pub reference_stride: usize,
    pub reference_blocks: usize,
    /// Probes taken per candidate iteration count
    pub repetitions: usize,
    /// Largest accepted max/min latency ratio across the repetitions
    pub max_spread: f64,
    /// Iteration count the search starts doubling from
    pub floor_iterations: u64,
    pub retry: RetryPolicy,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            reference_stride: 64,
            reference_blocks: 64,
            repetitions: 100,
            max_spread: 1.05,
            floor_iterations: 1_000_000,
            retry: RetryPolicy::UntilAgreement,
        }
    }
}

/// Full configuration of one detector run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    pub iterations: u64,
    pub jump_ratio: f64,
    pub sweep: SweepLimits,
    /// Allowed distance, in blocks, between jump(H) and jump(H/2)/2 while the jump still moves
    pub movement_tolerance: f64,
    /// Relative band around 1.0 inside which offset and base jump points count as equal
    pub line_tolerance: f64,
    pub min_line_size: usize,
    /// Restarts allowed when a line size candidate fails confirmation
    pub line_retry: RetryPolicy,
    pub calibration: CalibrationConfig,
    pub consensus: ConsensusMode,
    /// Consensus retries
    pub retry: RetryPolicy,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            iterations: DEFAULT_ITERATIONS,
            jump_ratio: DEFAULT_JUMP_RATIO,
            sweep: SweepLimits::default(),
            movement_tolerance: 2.0,
            line_tolerance: 0.10,
            min_line_size: 16,
            line_retry: RetryPolicy::UntilAgreement,
            calibration: CalibrationConfig::default(),
            consensus: ConsensusMode::default(),
            retry: RetryPolicy::UntilAgreement,
        }
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

fn check_stride(name: &'static str, stride: usize) -> Result<(), ConfigError> {
    if stride < POINTER_WIDTH || !stride.is_power_of_two() {
        return Err(invalid(
            name,
            format!("{stride} must be a power of two >= {POINTER_WIDTH}"),
        ));
    }
    Ok(())
}

impl DetectorConfig {
    /// Reject parameter combinations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iterations == 0 {
            return Err(invalid("iterations", "must be non-zero"));
        }
        if !(self.jump_ratio > 1.0) {
            return Err(invalid("jump_ratio", "must be greater than 1.0"));
        }
        check_stride("sweep.min_stride", self.sweep.min_stride)?;
        check_stride("min_line_size", self.min_line_size)?;
        if self.sweep.max_stride < self.sweep.min_stride {
            return Err(invalid("sweep.max_stride", "must be >= sweep.min_stride"));
        }
        if self.sweep.max_blocks < 2 {
            return Err(invalid("sweep.max_blocks", "at least two blocks are needed to see a jump"));
        }
        if self.sweep.max_buffer_size < self.sweep.min_stride * self.sweep.max_blocks {
            return Err(invalid(
                "sweep.max_buffer_size",
                "too small for even the first stride sweep",
            ));
        }
        if !(self.movement_tolerance >= 0.0) {
            return Err(invalid("movement_tolerance", "must be non-negative"));
        }
        if !(self.line_tolerance > 0.0 && self.line_tolerance < 1.0) {
            return Err(invalid("line_tolerance", "must be within (0, 1)"));
        }
        let calibration = &self.calibration;
        if calibration.repetitions < 2 {
            return Err(invalid("calibration.repetitions", "must be at least 2"));
        }
        if !(calibration.max_spread >= 1.0) {
            return Err(invalid("calibration.max_spread", "must be >= 1.0"));
        }
        if calibration.floor_iterations == 0 {
            return Err(invalid("calibration.floor_iterations", "must be non-zero"));
        }
        if calibration.reference_blocks == 0 || calibration.reference_stride < POINTER_WIDTH {
            return Err(invalid(
                "calibration.reference",
                "reference layout needs a non-empty working set of pointer-sized blocks",
            ));
        }
        Ok(())
    }
}

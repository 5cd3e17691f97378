//! L1 data cache geometry from software-observable timing.
//!
//! Pointer-chasing walks over randomized layouts are timed while the stride and working set are
//! swept. Latency jumps mark cache resource boundaries, and the sequence of those boundaries
//! yields associativity, capacity and line size. Repeated passes must agree before a result is
//! reported.
pub mod affinity;
pub mod calibrate;
pub mod capacity;
pub mod config;
pub mod consensus;
pub mod error;
pub mod geometry;
pub mod history;
pub mod jump;
pub mod line_size;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod simulated;

pub use config::{ConsensusMode, DetectorConfig, RetryPolicy};
pub use consensus::{Consensus, ConsensusOrchestrator, DetectionPass};
pub use error::{ConfigError, Error, Result, Undetermined};
pub use geometry::GeometryEstimate;
pub use pipeline::Pipeline;
pub use probe::{ChaseLayout, LatencyProbe, PointerChaseProbe};
pub use report::GeometryReport;

use calibrate::StabilityCalibrator;

/// Full run: optional calibration, then passes until consensus.
///
/// With `calibrate` unset the configured iteration count is used as is.
pub fn detect<P: LatencyProbe>(
    probe: P,
    config: DetectorConfig,
    calibrate: bool,
) -> Result<GeometryReport> {
    config.validate()?;
    let mut pipeline = Pipeline::new(probe, config);

    let iterations = if calibrate {
        StabilityCalibrator::new(config.calibration).calibrate(pipeline.probe_mut())?
    } else {
        config.iterations
    };

    let consensus = ConsensusOrchestrator::from_config(&config).run(&mut pipeline, iterations)?;
    Ok(consensus.into())
}

/// Convert number of bytes to formatted string
pub fn format_size(bytes: f32) -> String {
    const MB: f32 = 1024.0 * 1024.0;
    const KB: f32 = 1024.0;

    if bytes >= MB {
        format!("{:.2} MiB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2} KiB", bytes / KB)
    } else {
        format!("{:.0} B", bytes)
    }
}

/// Convert number of bytes to formatted string for fixed-width integer string
pub fn format_size_fixed_int(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= MB {
        format!("{:>4} MiB", bytes / MB)
    } else if bytes >= KB {
        format!("{:>4} KiB", bytes / KB)
    } else {
        format!("{:>4} B", bytes)
    }
}

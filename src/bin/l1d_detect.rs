//! L1 data cache geometry detection via pointer chasing
//!
//! Pins itself to one core, calibrates the pointer-chase length until repeated measurements
//! agree, then runs the detection pipeline until independent passes reach consensus.
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use l1d_geometry_rs::affinity::{default_core, isolate_current_thread};
use l1d_geometry_rs::{
    ConsensusMode, DetectorConfig, GeometryReport, PointerChaseProbe, Result, RetryPolicy, detect,
};
use log::{error, info};

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Three passes, per-field two-of-three agreement, restart on a three-way split
    Majority,
    /// Two identical passes, doubling iterations on mismatch
    Sanity,
}

impl From<Mode> for ConsensusMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Majority => ConsensusMode::Majority,
            Mode::Sanity => ConsensusMode::SanityCheck,
        }
    }
}

/// Infer L1d associativity, capacity and line size from access latency
#[derive(Parser, Debug)]
#[command(name = "l1d_detect")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Consensus strategy across repeated passes
    #[arg(long, value_enum, default_value_t = Mode::Majority)]
    mode: Mode,

    /// Fixed pointer-chase length per probe; skips calibration
    #[arg(short = 'n', long)]
    iterations: Option<u64>,

    /// Give up after this many disagreeing attempts instead of retrying forever
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Latency ratio between consecutive samples that counts as a jump
    #[arg(long, default_value_t = l1d_geometry_rs::config::DEFAULT_JUMP_RATIO)]
    jump_ratio: f64,

    /// Largest working set per stride sweep, in blocks
    #[arg(long)]
    max_blocks: Option<usize>,

    /// Largest probe buffer, in bytes
    #[arg(long)]
    max_buffer_size: Option<usize>,

    /// Largest stride tried, in bytes
    #[arg(long)]
    max_stride: Option<usize>,

    /// CPU core to pin the measurement thread to (defaults to the first core)
    #[arg(long)]
    core: Option<usize>,

    /// Seed for the permutation generator, for reproducible layouts
    #[arg(long)]
    seed: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn config(&self) -> DetectorConfig {
        let mut config = DetectorConfig {
            jump_ratio: self.jump_ratio,
            consensus: self.mode.into(),
            ..DetectorConfig::default()
        };
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(max) = self.max_attempts {
            config.retry = RetryPolicy::MaxAttempts(max);
            config.line_retry = RetryPolicy::MaxAttempts(max);
            config.calibration.retry = RetryPolicy::MaxAttempts(max);
        }
        if let Some(max_blocks) = self.max_blocks {
            config.sweep.max_blocks = max_blocks;
        }
        if let Some(max_buffer_size) = self.max_buffer_size {
            config.sweep.max_buffer_size = max_buffer_size;
        }
        if let Some(max_stride) = self.max_stride {
            config.sweep.max_stride = max_stride;
        }
        config
    }
}

fn run(cli: &Cli) -> Result<GeometryReport> {
    let config = cli.config();
    let calibrate = cli.iterations.is_none();
    let probe = match cli.seed {
        Some(seed) => PointerChaseProbe::with_seed(seed),
        None => PointerChaseProbe::new(),
    };
    detect(probe, config, calibrate)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    isolate_current_thread(cli.core.or_else(default_core));

    let report = match run(&cli) {
        Ok(report) => report,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!("couldn't serialize report: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{report}");
    }

    info!("detection completed");
    ExitCode::SUCCESS
}

//! Error and outcome types for cache geometry detection.
//!
//! Three kinds of failure are kept apart: configuration errors (never retried),
//! detection failures (a field stays undetermined) and measurement disagreement
//! (repeated passes never agreed within the allowed attempts).
use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Caller or environment misconfiguration. Retrying will not help.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Each block must be able to hold a forward pointer
    #[error("stride {stride} B is smaller than the pointer width ({pointer_width} B)")]
    StrideBelowPointerWidth { stride: usize, pointer_width: usize },

    /// Forward pointers would be stored unaligned
    #[error("stride {stride} B is not a multiple of the pointer width ({pointer_width} B)")]
    MisalignedStride { stride: usize, pointer_width: usize },

    #[error("working set must contain at least one block")]
    EmptyWorkingSet,

    #[error("buffer of {blocks} blocks at stride {stride} B overflows the address space")]
    BufferTooLarge { stride: usize, blocks: usize },

    #[error("failed to allocate {size} bytes aligned to {align}")]
    AllocationFailed { size: usize, align: usize },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Which part of the geometry could not be resolved within the swept ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Undetermined {
    #[error("associativity did not stabilize for strides up to {max_stride} B")]
    Associativity { max_stride: usize },

    #[error("no line size transition found for candidates up to {max_candidate} B")]
    LineSize { max_candidate: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("detection failed: {0}")]
    DetectionFailure(#[from] Undetermined),

    #[error("measurements still disagree after {attempts} attempts")]
    MeasurementDisagreement { attempts: u32 },

    /// The walk ended on a null pointer, so the permutation was not a closed cycle
    #[error("pointer chase ended on a null pointer")]
    BrokenChain,
}

impl Error {
    /// True for errors that must stop the program instead of being retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::BrokenChain)
    }
}

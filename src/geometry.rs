//! Result of one detection pass.
use crate::capacity::CacheShape;
use serde::Serialize;

/// Geometry found by one pass. `None` marks a field that could not be determined; it is never
/// replaced by a guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct GeometryEstimate {
    pub associativity: Option<usize>,
    pub stable_stride: Option<usize>,
    pub line_size: Option<usize>,
}

impl GeometryEstimate {
    pub fn new(shape: Option<CacheShape>, line_size: Option<usize>) -> Self {
        GeometryEstimate {
            associativity: shape.map(|shape| shape.associativity),
            stable_stride: shape.map(|shape| shape.stable_stride),
            line_size,
        }
    }

    /// Shape of the cache, when both associativity and stable stride are known
    pub fn shape(&self) -> Option<CacheShape> {
        Some(CacheShape {
            associativity: self.associativity?,
            stable_stride: self.stable_stride?,
        })
    }

    /// `associativity * stable_stride`, when both are known
    pub fn capacity_bytes(&self) -> Option<usize> {
        self.shape().map(|shape| shape.capacity_bytes())
    }

    pub fn is_complete(&self) -> bool {
        self.shape().is_some() && self.line_size.is_some()
    }
}

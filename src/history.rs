//! Append-only log of jump points found during one detection pass.
use serde::Serialize;

/// Smallest working set (in blocks) at which stride `stride` showed a latency jump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JumpPoint {
    pub stride: usize,
    pub blocks: usize,
}

#[derive(Debug, Clone, Default)]
pub struct JumpHistory {
    points: Vec<JumpPoint>,
}

impl JumpHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, point: JumpPoint) {
        self.points.push(point);
    }

    /// Forget everything; called at the start of each detection pass
    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn points(&self) -> &[JumpPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Most recent jump point recorded for `stride`
    pub fn latest_for_stride(&self, stride: usize) -> Option<usize> {
        self.points
            .iter()
            .rev()
            .find(|point| point.stride == stride)
            .map(|point| point.blocks)
    }

    /// Whether the jump at `stride` still moves with the stride, i.e. sits within `tolerance`
    /// blocks of half the jump at `stride / 2`.
    ///
    /// At or below `first_stride`, or when either stride has no recorded jump, there is nothing
    /// to compare against and the jump counts as moving.
    pub fn is_moving(&self, stride: usize, first_stride: usize, tolerance: f64) -> bool {
        if stride <= first_stride {
            return true;
        }
        match (
            self.latest_for_stride(stride),
            self.latest_for_stride(stride / 2),
        ) {
            (Some(current), Some(previous)) => {
                let expected = previous as f64 / 2.0;
                (current as f64 - expected).abs() <= tolerance
            }
            _ => true,
        }
    }
}

//! Final, caller-visible report of a detector run.
use crate::consensus::Consensus;
use crate::format_size_fixed_int;
use serde::Serialize;
use std::fmt;

/// Flat view of an accepted estimate, ready for printing or JSON output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GeometryReport {
    pub associativity: Option<usize>,
    pub stable_stride: Option<usize>,
    pub capacity_bytes: Option<usize>,
    pub capacity_kb: Option<usize>,
    pub line_size: Option<usize>,
    pub tries: u32,
    pub iterations: u64,
}

impl From<Consensus> for GeometryReport {
    fn from(consensus: Consensus) -> Self {
        let capacity_bytes = consensus.estimate.capacity_bytes();
        GeometryReport {
            associativity: consensus.estimate.associativity,
            stable_stride: consensus.estimate.stable_stride,
            capacity_bytes,
            capacity_kb: capacity_bytes.map(|bytes| bytes / 1024),
            line_size: consensus.estimate.line_size,
            tries: consensus.tries,
            iterations: consensus.iterations,
        }
    }
}

impl GeometryReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

struct Field(Option<usize>, &'static str);

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{value}{}", self.1),
            None => f.write_str("undetermined"),
        }
    }
}

impl fmt::Display for GeometryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== L1 Data Cache Detection ===")?;
        writeln!(f, "Associativity: {}", Field(self.associativity, ""))?;
        writeln!(f, "Stride at stability: {}", Field(self.stable_stride, " bytes"))?;
        match self.capacity_bytes {
            Some(bytes) => writeln!(
                f,
                "Estimated capacity: {bytes} bytes ({})",
                format_size_fixed_int(bytes as u64).trim_start()
            )?,
            None => writeln!(f, "Estimated capacity: undetermined")?,
        }
        writeln!(f, "Line size: {}", Field(self.line_size, " bytes"))?;
        write!(
            f,
            "Tries: {} ({} iterations per probe)",
            self.tries, self.iterations
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometryEstimate;

    fn report(line_size: Option<usize>) -> GeometryReport {
        GeometryReport::from(Consensus {
            estimate: GeometryEstimate {
                associativity: Some(8),
                stable_stride: Some(4096),
                line_size,
            },
            tries: 1,
            iterations: 10_000_000,
        })
    }

    #[test]
    fn text_report() {
        let text = report(Some(64)).to_string();
        assert!(text.starts_with("=== L1 Data Cache Detection ===\n"));
        assert!(text.contains("Associativity: 8\n"));
        assert!(text.contains("Stride at stability: 4096 bytes\n"));
        assert!(text.contains("Estimated capacity: 32768 bytes (32 KiB)\n"));
        assert!(text.contains("Line size: 64 bytes\n"));
    }

    #[test]
    fn undetermined_fields_are_spelled_out() {
        let text = report(None).to_string();
        assert!(text.contains("Line size: undetermined\n"));
    }

    #[test]
    fn json_uses_null_for_undetermined() {
        let json: serde_json::Value =
            serde_json::from_str(&report(None).to_json().unwrap()).unwrap();
        assert_eq!(json["associativity"], 8);
        assert_eq!(json["capacity_kb"], 32);
        assert!(json["line_size"].is_null());
        assert_eq!(json["tries"], 1);
    }
}

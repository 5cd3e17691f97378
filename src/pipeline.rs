//! One full detection pass: associativity and capacity first, then line size.
use crate::capacity::CapacitySearch;
use crate::config::DetectorConfig;
use crate::consensus::DetectionPass;
use crate::error::{Error, Result};
use crate::geometry::GeometryEstimate;
use crate::history::JumpHistory;
use crate::line_size::LineSizeSearch;
use crate::probe::LatencyProbe;
use log::{debug, warn};

/// Drives one probe through the capacity and line size searches.
pub struct Pipeline<P> {
    probe: P,
    config: DetectorConfig,
    history: JumpHistory,
}

impl<P: LatencyProbe> Pipeline<P> {
    pub fn new(probe: P, config: DetectorConfig) -> Self {
        Pipeline {
            probe,
            config,
            history: JumpHistory::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Jump points of the most recent pass
    pub fn history(&self) -> &JumpHistory {
        &self.history
    }

    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }

    pub fn into_probe(self) -> P {
        self.probe
    }
}

/// Turn a detection failure into an undetermined field, pass anything else through
fn undetermined_as_none<T>(outcome: Result<T>) -> Result<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(Error::DetectionFailure(reason)) => {
            warn!("{reason}");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

impl<P: LatencyProbe> DetectionPass for Pipeline<P> {
    fn run_pass(&mut self, iterations: u64) -> Result<GeometryEstimate> {
        self.history.clear();

        let shape = undetermined_as_none(
            CapacitySearch::from_config(&self.config, iterations)
                .run(&mut self.probe, &mut self.history),
        )?;

        // line size is only meaningful once capacity is known
        let line_size = match shape {
            Some(shape) => undetermined_as_none(
                LineSizeSearch::from_config(&self.config, iterations).run(&mut self.probe, shape),
            )?,
            None => None,
        };

        let estimate = GeometryEstimate::new(shape, line_size);
        debug!("pass at {iterations} iterations: {estimate:?}");
        Ok(estimate)
    }
}

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Paired (timestamp, voltage) samples for a single channel.
///
/// Time is expected to be monotonically non-decreasing. The sampling rate is
/// derived from the first two timestamps rather than stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Timestamps in seconds
    pub time: Vec<f64>,
    /// Voltage samples
    pub voltage: Vec<f64>,
}

impl Signal {
    pub fn new(time: Vec<f64>, voltage: Vec<f64>) -> Result<Self> {
        if time.len() != voltage.len() {
            return Err(EngineError::invalid(format!(
                "time axis has {} samples but voltage has {}",
                time.len(),
                voltage.len()
            )));
        }
        Ok(Self { time, voltage })
    }

    /// Build a signal on a uniform time axis starting at zero.
    pub fn from_uniform(fs: f64, voltage: Vec<f64>) -> Self {
        let time = (0..voltage.len()).map(|i| i as f64 / fs).collect();
        Self { time, voltage }
    }

    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    /// `1 / (t[1] - t[0])`.
    pub fn sampling_rate(&self) -> Result<f64> {
        sampling_rate(&self.time)
    }
}

/// Derive the sampling rate of a time axis from its first step.
pub fn sampling_rate(time: &[f64]) -> Result<f64> {
    if time.len() < 2 {
        return Err(EngineError::invalid(format!(
            "time axis needs at least 2 samples to derive a sampling rate, got {}",
            time.len()
        )));
    }
    let dt = time[1] - time[0];
    if !(dt.is_finite() && dt > 0.0) {
        return Err(EngineError::invalid(format!(
            "time axis must be increasing, first step was {dt}"
        )));
    }
    Ok(1.0 / dt)
}

/// Point events on a timeline (e.g., R-peak sample indices)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Events {
    pub indices: Vec<usize>,
}

impl Events {
    pub fn from_indices(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Stable identifier assigned to a beat when it is detected.
///
/// Identifiers are positions in the retained beat sequence of one detection
/// run. They are never reused across runs because every re-detection replaces
/// all downstream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BeatId(pub u32);

impl BeatId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One detected heart cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    pub id: BeatId,
    /// Sample position of the peak in the source signal
    pub sample_index: usize,
    /// Time of the detected peak (seconds)
    #[serde(rename = "ts")]
    pub timestamp: f64,
    /// Seconds since the previous detected peak
    #[serde(rename = "RR")]
    pub rr: f64,
    /// 60 / RR
    #[serde(rename = "HR")]
    pub hr: f64,
    /// Conditioned voltage at the peak
    pub amplitude: f64,
}

impl Beat {
    pub fn new(id: BeatId, sample_index: usize, timestamp: f64, rr: f64, amplitude: f64) -> Self {
        Self {
            id,
            sample_index,
            timestamp,
            rr,
            hr: 60.0 / rr,
            amplitude,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_rate_from_first_step() {
        let signal = Signal::from_uniform(250.0, vec![0.0; 10]);
        let fs = signal.sampling_rate().unwrap();
        assert!((fs - 250.0).abs() < 1e-9);
    }

    #[test]
    fn sampling_rate_requires_two_samples() {
        let err = sampling_rate(&[0.0]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert!(Signal::new(vec![0.0, 1.0], vec![1.0]).is_err());
    }

    #[test]
    fn heart_rate_is_sixty_over_rr() {
        let beat = Beat::new(BeatId(0), 10, 1.0, 0.8, 1.0);
        assert!((beat.hr - 75.0).abs() < 1e-12);
    }
}

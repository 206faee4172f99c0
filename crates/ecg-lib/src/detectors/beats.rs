use crate::{
    detectors::peaks::{find_peaks, neighbour_mean, percentile},
    error::{EngineError, Result},
    filters,
    signal::{sampling_rate, Beat, BeatId, Events, Signal},
};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Configurable parameters for R-peak detection.
///
/// Field names follow the option names used in analysis config files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum spacing between accepted peaks (milliseconds).
    #[serde(rename = "min_RR")]
    pub min_rr_ms: f64,
    /// Multiply the trace by -1 before anything else.
    pub ecg_invert: bool,
    /// Rectify the trace (applied after inversion).
    pub ecg_abs_value: bool,
    /// Highpass the trace before thresholding.
    pub ecg_filter: bool,
    pub ecg_filt_order: usize,
    /// Highpass cutoff (Hz).
    pub ecg_filt_cutoff: f64,
    /// Absolute peak height. Wins over `perc_thresh` when both are set.
    pub abs_thresh: Option<f64>,
    /// Peak height as a percentile (0-100) of the conditioned trace.
    pub perc_thresh: Option<f64>,
    /// Drop peaks whose neighbouring samples average below `breath_filter_cutoff`.
    pub breath_filter: bool,
    pub breath_filter_cutoff: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_rr_ms: 100.0,
            ecg_invert: false,
            ecg_abs_value: false,
            ecg_filter: true,
            ecg_filt_order: 2,
            ecg_filt_cutoff: 5.0,
            abs_thresh: None,
            perc_thresh: Some(97.0),
            breath_filter: false,
            breath_filter_cutoff: 0.0,
        }
    }
}

impl DetectionConfig {
    /// Settings used for anesthetized-preparation recordings.
    pub fn anesthetized() -> Self {
        Self {
            min_rr_ms: 60.0,
            ..Self::default()
        }
    }

    /// Settings used for rectified ECGenie text exports.
    pub fn ecgenie() -> Self {
        Self {
            ecg_abs_value: true,
            ..Self::anesthetized()
        }
    }

    /// Minimum peak spacing in samples at `fs`, never below one.
    pub fn min_distance_samples(&self, fs: f64) -> usize {
        ((self.min_rr_ms / 1000.0 * fs) as usize).max(1)
    }
}

/// Result of one detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatDetection {
    pub fs: f64,
    pub threshold: f64,
    /// Every accepted peak, including the first and last which carry no beat.
    pub peaks: Events,
    pub beats: Vec<Beat>,
    /// Inverted/rectified/filtered trace the peaks were picked on.
    #[serde(skip)]
    pub conditioned: Vec<f64>,
}

/// Detect beats on a single-channel signal.
///
/// Fails with `InvalidInput` when the time axis cannot yield a sampling rate,
/// when no threshold can be resolved, or when the filter design is invalid.
/// Fewer than three accepted peaks produce an empty beat list.
pub fn detect_beats(signal: &Signal, cfg: &DetectionConfig) -> Result<BeatDetection> {
    let fs = sampling_rate(&signal.time)?;
    let conditioned = condition(&signal.voltage, fs, cfg)?;
    let threshold = resolve_threshold(&conditioned, cfg)?;
    info!("beat detection threshold: {threshold}");

    let distance = cfg.min_distance_samples(fs);
    let mut peaks = find_peaks(&conditioned, Some(threshold), distance);
    if cfg.breath_filter {
        let before = peaks.len();
        peaks.retain(|&i| {
            neighbour_mean(&conditioned, i).is_some_and(|m| m >= cfg.breath_filter_cutoff)
        });
        debug!(
            "breath filter removed {} of {} peaks (cutoff {})",
            before - peaks.len(),
            before,
            cfg.breath_filter_cutoff
        );
    }

    let beats = beats_from_peaks(&signal.time, &conditioned, &peaks);
    info!(
        "detected {} peaks, {} beats retained (fs {:.1} Hz, min spacing {} samples)",
        peaks.len(),
        beats.len(),
        fs,
        distance
    );
    Ok(BeatDetection {
        fs,
        threshold,
        peaks: Events::from_indices(peaks),
        beats,
        conditioned,
    })
}

/// Apply inversion, rectification and the optional highpass, in that order.
pub fn condition(voltage: &[f64], fs: f64, cfg: &DetectionConfig) -> Result<Vec<f64>> {
    let mut data: Vec<f64> = voltage.to_vec();
    if cfg.ecg_invert {
        data.iter_mut().for_each(|v| *v = -*v);
    }
    if cfg.ecg_abs_value {
        data.iter_mut().for_each(|v| *v = v.abs());
    }
    if cfg.ecg_filter {
        data = filters::highpass(&data, fs, cfg.ecg_filt_cutoff, cfg.ecg_filt_order)?;
    }
    Ok(data)
}

fn resolve_threshold(conditioned: &[f64], cfg: &DetectionConfig) -> Result<f64> {
    if let Some(abs) = cfg.abs_thresh {
        return Ok(abs);
    }
    let perc = cfg.perc_thresh.ok_or_else(|| {
        EngineError::invalid("no peak threshold: set either abs_thresh or perc_thresh")
    })?;
    percentile(conditioned, perc).ok_or_else(|| {
        EngineError::invalid(format!(
            "percentile threshold {perc} is undefined for this trace"
        ))
    })
}

/// Turn accepted peak positions into beats. The first and last peaks are
/// dropped because their surrounding intervals are not fully observed.
pub fn beats_from_peaks(time: &[f64], conditioned: &[f64], peaks: &[usize]) -> Vec<Beat> {
    if peaks.len() < 3 {
        return Vec::new();
    }
    peaks
        .windows(2)
        .take(peaks.len() - 2)
        .enumerate()
        .map(|(i, w)| {
            let rr = time[w[1]] - time[w[0]];
            Beat::new(BeatId(i as u32), w[1], time[w[1]], rr, conditioned[w[1]])
        })
        .collect()
}

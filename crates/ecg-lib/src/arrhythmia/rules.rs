use super::{Category, CategoryFlags};
use crate::signal::Beat;
use log::debug;
use serde::{Deserialize, Serialize};

/// Beats on each side of the centre that feed the local RR baseline.
const BASELINE_HALF_WINDOW: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    /// Heart rates at or below this (bpm) are bradycardic.
    pub bradycardia_absolute_hr: f64,
    /// Heart rates at or above this (bpm) are tachycardic.
    pub tachycardia_absolute_hr: f64,
    /// RR / local baseline at or above this flags a skipped beat.
    pub skipped_beat_multiple_rr: f64,
    /// Interval / local baseline at or below this flags a premature beat.
    pub premature_beat_multiple_rr: f64,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            bradycardia_absolute_hr: 300.0,
            tachycardia_absolute_hr: 850.0,
            skipped_beat_multiple_rr: 1.5,
            premature_beat_multiple_rr: 0.25,
        }
    }
}

impl RuleSettings {
    pub fn bradycardia_rr(&self) -> f64 {
        60.0 / self.bradycardia_absolute_hr
    }

    pub fn tachycardia_rr(&self) -> f64 {
        60.0 / self.tachycardia_absolute_hr
    }
}

/// Run every rule. Columns come back in `Category::RULES` order.
pub fn call_arrhythmias(beats: &[Beat], settings: &RuleSettings) -> Vec<CategoryFlags> {
    let baseline = local_rr_baseline(beats);
    let flags = vec![
        CategoryFlags {
            category: Category::BradycardiaAbsolute,
            values: call_bradycardia_absolute(beats, settings.bradycardia_rr()),
        },
        CategoryFlags {
            category: Category::TachycardiaAbsolute,
            values: call_tachycardia_absolute(beats, settings.tachycardia_rr()),
        },
        CategoryFlags {
            category: Category::SkippedBeat,
            values: call_skipped_beat(beats, &baseline, settings.skipped_beat_multiple_rr),
        },
        CategoryFlags {
            category: Category::PremBeat,
            values: call_premature_beat(beats, &baseline, settings.premature_beat_multiple_rr),
        },
    ];
    for f in &flags {
        debug!("{}: {} of {} beats", f.category, f.count(), beats.len());
    }
    flags
}

pub fn call_bradycardia_absolute(beats: &[Beat], rr_threshold: f64) -> Vec<bool> {
    beats.iter().map(|b| b.rr >= rr_threshold).collect()
}

pub fn call_tachycardia_absolute(beats: &[Beat], rr_threshold: f64) -> Vec<bool> {
    beats.iter().map(|b| b.rr <= rr_threshold).collect()
}

/// `RR / baseline >= multiple`.
pub fn call_skipped_beat(beats: &[Beat], baseline: &[Option<f64>], multiple: f64) -> Vec<bool> {
    beats
        .iter()
        .zip(baseline)
        .map(|(b, base)| ratio(Some(b.rr), *base).is_some_and(|r| r >= multiple))
        .collect()
}

/// `(ts[i] - ts[i-1]) / baseline <= multiple`.
///
/// The numerator is the spacing to the previous retained beat, not the beat's
/// own RR, so the first beat of a record is never flagged.
pub fn call_premature_beat(beats: &[Beat], baseline: &[Option<f64>], multiple: f64) -> Vec<bool> {
    beats
        .iter()
        .enumerate()
        .zip(baseline)
        .map(|((i, b), base)| {
            let spacing = i.checked_sub(1).map(|prev| b.timestamp - beats[prev].timestamp);
            ratio(spacing, *base).is_some_and(|r| r <= multiple)
        })
        .collect()
}

fn ratio(numerator: Option<f64>, baseline: Option<f64>) -> Option<f64> {
    match (numerator, baseline) {
        (Some(n), Some(d)) if d > 0.0 => Some(n / d),
        _ => None,
    }
}

/// Mean RR of up to three beats on either side, excluding the beat itself.
/// The window shrinks at the ends; a lone beat has no baseline.
pub fn local_rr_baseline(beats: &[Beat]) -> Vec<Option<f64>> {
    let n = beats.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(BASELINE_HALF_WINDOW);
            let hi = (i + BASELINE_HALF_WINDOW).min(n.saturating_sub(1));
            let (sum, count) = (lo..=hi)
                .filter(|&j| j != i)
                .fold((0.0, 0usize), |(s, c), j| (s + beats[j].rr, c + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect()
}

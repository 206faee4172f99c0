use crate::signal::Signal;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticEcg {
    pub fs: f64,
    pub duration_s: f64,
    pub heart_rate_bpm: f64,
    /// Time of the first regular beat.
    pub first_beat_s: f64,
    /// Standard deviation of the Gaussian R wave (seconds).
    pub r_width_s: f64,
    pub r_amplitude: f64,
    pub baseline_amplitude: f64,
    pub baseline_hz: f64,
    /// Half-width of the uniform noise added to every sample.
    pub noise_amplitude: f64,
    /// Regular beat indices followed by an extra beat `premature_offset_s` later.
    pub premature_after: Vec<usize>,
    pub premature_offset_s: f64,
    /// Regular beat indices drawn with a widened, notched complex.
    pub aberrant_beats: Vec<usize>,
    pub seed: u64,
}

impl Default for SyntheticEcg {
    fn default() -> Self {
        Self {
            fs: 250.0,
            duration_s: 30.0,
            heart_rate_bpm: 72.0,
            first_beat_s: 0.5,
            r_width_s: 0.02,
            r_amplitude: 1.2,
            baseline_amplitude: 0.05,
            baseline_hz: 0.3,
            noise_amplitude: 0.01,
            premature_after: Vec::new(),
            premature_offset_s: 0.3,
            aberrant_beats: Vec::new(),
            seed: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticRecording {
    pub signal: Signal,
    /// Every beat drawn, in time order, premature beats included.
    pub beat_times: Vec<f64>,
    pub premature_times: Vec<f64>,
    pub aberrant_times: Vec<f64>,
}

/// Render a synthetic recording. Beats are only placed where the whole
/// complex fits inside the record.
pub fn synthetic_ecg(spec: &SyntheticEcg) -> SyntheticRecording {
    let period = 60.0 / spec.heart_rate_bpm;
    let margin = (spec.r_width_s * 8.0).max(0.3);
    let last_allowed = spec.duration_s - margin;

    let mut beats: Vec<(f64, bool)> = Vec::new();
    let mut premature_times = Vec::new();
    let mut aberrant_times = Vec::new();
    let mut k = 0usize;
    loop {
        let t = spec.first_beat_s + k as f64 * period;
        if t > last_allowed {
            break;
        }
        let aberrant = spec.aberrant_beats.contains(&k);
        if aberrant {
            aberrant_times.push(t);
        }
        beats.push((t, aberrant));
        if spec.premature_after.contains(&k) {
            let extra = t + spec.premature_offset_s;
            if extra <= last_allowed {
                premature_times.push(extra);
                beats.push((extra, false));
            }
        }
        k += 1;
    }
    beats.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n = (spec.duration_s * spec.fs) as usize;
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let mut data = Vec::with_capacity(n);
    for i in 0..n {
        let time = i as f64 / spec.fs;
        let mut v = spec.baseline_amplitude * (2.0 * PI * spec.baseline_hz * time).sin();
        for &(bt, aberrant) in &beats {
            let dt = time - bt;
            if dt.abs() > margin {
                continue;
            }
            v += if aberrant {
                aberrant_complex(dt, spec)
            } else {
                spec.r_amplitude * gaussian(dt, spec.r_width_s)
            };
        }
        if spec.noise_amplitude > 0.0 {
            v += rng.gen_range(-spec.noise_amplitude..=spec.noise_amplitude);
        }
        data.push(v);
    }

    SyntheticRecording {
        signal: Signal::from_uniform(spec.fs, data),
        beat_times: beats.into_iter().map(|(t, _)| t).collect(),
        premature_times,
        aberrant_times,
    }
}

fn gaussian(dt: f64, width: f64) -> f64 {
    (-0.5 * (dt / width).powi(2)).exp()
}

fn aberrant_complex(dt: f64, spec: &SyntheticEcg) -> f64 {
    let w = spec.r_width_s * 2.5;
    spec.r_amplitude * gaussian(dt, w) - 0.8 * spec.r_amplitude * gaussian(dt - 2.0 * w, w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_beats_follow_heart_rate() {
        let rec = synthetic_ecg(&SyntheticEcg::default());
        assert_eq!(rec.signal.len(), 7500);
        for w in rec.beat_times.windows(2) {
            assert!((w[1] - w[0] - 60.0 / 72.0).abs() < 1e-9);
        }
        assert!(*rec.beat_times.last().unwrap() <= 30.0 - 0.3);
    }

    #[test]
    fn premature_beats_are_inserted_in_order() {
        let spec = SyntheticEcg {
            fs: 10.0,
            duration_s: 20.0,
            heart_rate_bpm: 60.0,
            first_beat_s: 1.0,
            premature_after: vec![5],
            ..SyntheticEcg::default()
        };
        let rec = synthetic_ecg(&spec);
        assert_eq!(rec.premature_times, vec![6.0 + 0.3]);
        let pos = rec
            .beat_times
            .iter()
            .position(|&t| (t - 6.3).abs() < 1e-9)
            .unwrap();
        assert!((rec.beat_times[pos - 1] - 6.0).abs() < 1e-9);
        assert!((rec.beat_times[pos + 1] - 7.0).abs() < 1e-9);
    }

    #[test]
    fn same_seed_same_trace() {
        let a = synthetic_ecg(&SyntheticEcg::default());
        let b = synthetic_ecg(&SyntheticEcg::default());
        assert_eq!(a.signal.voltage, b.signal.voltage);
    }
}

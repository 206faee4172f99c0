use crate::{
    error::{EngineError, Result},
    signal::Beat,
};
use log::{debug, info};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const COMPONENTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeSettings {
    /// Epoch length in samples around each peak.
    pub window_size: usize,
    /// Relative share of the window placed before the peak. Used only
    /// together with `post`.
    pub pre: Option<f64>,
    pub post: Option<f64>,
    /// DBSCAN neighbourhood radius in PC space.
    pub eps: f64,
    /// Points (self included) needed within `eps` to form a core point.
    pub min_samples: usize,
}

impl Default for ShapeSettings {
    fn default() -> Self {
        Self {
            window_size: 250,
            pre: None,
            post: None,
            eps: 0.5,
            min_samples: 5,
        }
    }
}

impl ShapeSettings {
    /// Samples taken before and after the peak.
    pub fn offsets(&self) -> (usize, usize) {
        let window = self.window_size as f64;
        match (self.pre, self.post) {
            (Some(pre), Some(post)) if pre >= 0.0 && post >= 0.0 && pre + post > 0.0 => {
                let before = pre / (pre + post) * window;
                let after = post / (pre + post) * window;
                (before.round() as usize, after.round() as usize)
            }
            _ => {
                let half = (window / 2.0).round() as usize;
                (half, half)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.window_size < 2 {
            return Err(EngineError::invalid(format!(
                "window_size must be at least 2 samples, got {}",
                self.window_size
            )));
        }
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(EngineError::invalid(format!(
                "eps must be positive, got {}",
                self.eps
            )));
        }
        if self.min_samples == 0 {
            return Err(EngineError::invalid("min_samples must be at least 1"));
        }
        Ok(())
    }
}

/// Per-beat `abn_cluster` flags: epochs are projected onto two principal
/// components and density-clustered; DBSCAN noise is flagged. Beats whose
/// epoch would leave the record are never flagged.
pub fn call_abnormal_shapes(
    conditioned: &[f64],
    beats: &[Beat],
    settings: &ShapeSettings,
) -> Result<Vec<bool>> {
    settings.validate()?;
    let (before, after) = settings.offsets();
    let epochs = epoch_beats(conditioned, beats, before, after);
    let valid = epochs.iter().filter(|e| e.is_some()).count();
    if valid < settings.min_samples {
        return Err(EngineError::InsufficientData {
            valid,
            required: settings.min_samples,
        });
    }

    let rows: Vec<Vec<f64>> = epochs
        .iter()
        .flatten()
        .map(|epoch| normalize(&detrend(epoch)))
        .collect();
    let scores = pca_project(&rows, COMPONENTS);
    let labels = dbscan(&scores, settings.eps, settings.min_samples);

    let mut flags = vec![false; beats.len()];
    let valid_positions = epochs
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.as_ref().map(|_| i));
    for (pos, label) in valid_positions.zip(&labels) {
        flags[pos] = label.is_none();
    }
    let clusters = labels.iter().flatten().max().map_or(0, |m| m + 1);
    info!(
        "shape clustering: {} epochs, {} clusters, {} outliers",
        valid,
        clusters,
        flags.iter().filter(|f| **f).count()
    );
    Ok(flags)
}

/// Cut `[peak - before, peak + after]` (inclusive) around every beat.
pub fn epoch_beats(
    conditioned: &[f64],
    beats: &[Beat],
    before: usize,
    after: usize,
) -> Vec<Option<Vec<f64>>> {
    beats
        .iter()
        .map(|beat| {
            let idx = beat.sample_index;
            let start = idx.checked_sub(before);
            let end = idx + after;
            match start {
                Some(start) if end < conditioned.len() => Some(conditioned[start..=end].to_vec()),
                _ => {
                    debug!("beat {} epoch leaves the record, skipped", beat.id);
                    None
                }
            }
        })
        .collect()
}

/// Subtract the least-squares line.
pub fn detrend(data: &[f64]) -> Vec<f64> {
    let n = data.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = data.iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in data.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    data.iter()
        .enumerate()
        .map(|(i, y)| y - (mean_y + slope * (i as f64 - mean_x)))
        .collect()
}

/// Scale to unit L2 norm. An all-zero vector stays zero.
pub fn normalize(data: &[f64]) -> Vec<f64> {
    let norm = data.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        data.iter().map(|v| v / norm).collect()
    } else {
        vec![0.0; data.len()]
    }
}

/// Scores of each row on the leading `components` principal axes.
pub fn pca_project(rows: &[Vec<f64>], components: usize) -> Vec<Vec<f64>> {
    let n = rows.len();
    let d = rows.first().map_or(0, Vec::len);
    if n == 0 || d == 0 {
        return vec![Vec::new(); n];
    }
    let mut x = DMatrix::from_fn(n, d, |r, c| rows[r][c]);
    for mut col in x.column_iter_mut() {
        let mean = col.mean();
        col.add_scalar_mut(-mean);
    }
    let denom = n.saturating_sub(1).max(1) as f64;
    let cov = (x.transpose() * &x) / denom;
    let eig = cov.symmetric_eigen();

    let mut order: Vec<usize> = (0..d).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
    let axes: Vec<usize> = order.into_iter().take(components.min(d)).collect();

    let mut scores = vec![Vec::with_capacity(axes.len()); n];
    for &axis in &axes {
        let projected = &x * eig.eigenvectors.column(axis);
        for (row, value) in scores.iter_mut().zip(projected.iter()) {
            row.push(*value);
        }
    }
    scores
}

/// Density clustering. Returns a cluster label per point, `None` for noise.
///
/// Neighbourhoods are queried as clusters grow, so each point is scanned at
/// most once and memory stays linear in the number of points.
pub fn dbscan(points: &[Vec<f64>], eps: f64, min_samples: usize) -> Vec<Option<usize>> {
    let n = points.len();
    let region = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| distance(&points[i], &points[j]) <= eps)
            .collect()
    };

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut scanned = vec![false; n];
    let mut cluster = 0;
    for seed in 0..n {
        if labels[seed].is_some() || scanned[seed] {
            continue;
        }
        scanned[seed] = true;
        let seeds = region(seed);
        if seeds.len() < min_samples {
            continue;
        }
        labels[seed] = Some(cluster);
        let mut queue = VecDeque::new();
        for q in seeds {
            if labels[q].is_none() {
                labels[q] = Some(cluster);
                queue.push_back(q);
            }
        }
        while let Some(p) = queue.pop_front() {
            // Already scanned means it was rejected as a seed: a border point.
            if scanned[p] {
                continue;
            }
            scanned[p] = true;
            let neighbours = region(p);
            if neighbours.len() < min_samples {
                continue;
            }
            for q in neighbours {
                if labels[q].is_none() {
                    labels[q] = Some(cluster);
                    queue.push_back(q);
                }
            }
        }
        cluster += 1;
    }
    labels
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        detectors::beats::{detect_beats, DetectionConfig},
        signal::BeatId,
        simulate::{synthetic_ecg, SyntheticEcg},
    };

    fn beat_at(id: u32, sample_index: usize) -> Beat {
        Beat::new(BeatId(id), sample_index, sample_index as f64, 1.0, 1.0)
    }

    #[test]
    fn detrend_removes_line() {
        let data: Vec<f64> = (0..10).map(|i| 3.0 * i as f64 - 2.0).collect();
        assert!(detrend(&data).iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn normalize_handles_zero_vector() {
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
        let unit = normalize(&[3.0, 4.0]);
        assert!((unit[0] - 0.6).abs() < 1e-12 && (unit[1] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn offsets_are_centered_unless_skewed() {
        let centered = ShapeSettings {
            window_size: 100,
            ..ShapeSettings::default()
        };
        assert_eq!(centered.offsets(), (50, 50));
        let skewed = ShapeSettings {
            pre: Some(1.0),
            post: Some(3.0),
            ..centered
        };
        assert_eq!(skewed.offsets(), (25, 75));
        let half = ShapeSettings {
            pre: Some(1.0),
            ..centered
        };
        assert_eq!(half.offsets(), (50, 50));
    }

    #[test]
    fn epochs_leaving_the_record_are_skipped() {
        let data = vec![0.0; 20];
        let beats = [beat_at(0, 2), beat_at(1, 10), beat_at(2, 18)];
        let epochs = epoch_beats(&data, &beats, 3, 3);
        assert!(epochs[0].is_none());
        assert_eq!(epochs[1].as_ref().map(Vec::len), Some(7));
        assert!(epochs[2].is_none());
    }

    #[test]
    fn dbscan_marks_sparse_points_as_noise() {
        let mut points: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64 * 0.05, 0.0]).collect();
        points.push(vec![5.0, 5.0]);
        let labels = dbscan(&points, 0.5, 3);
        assert!(labels[..6].iter().all(|l| *l == Some(0)));
        assert_eq!(labels[6], None);
    }

    #[test]
    fn dbscan_border_points_join_cluster() {
        let points = vec![
            vec![0.0],
            vec![0.1],
            vec![0.2],
            vec![0.65],
        ];
        let labels = dbscan(&points, 0.5, 3);
        assert_eq!(labels, vec![Some(0); 4]);
    }

    #[test]
    fn dbscan_chains_through_core_points() {
        let points: Vec<Vec<f64>> = [0.0, 0.4, 0.8, 1.2, 1.6, 5.0, 10.0, 10.1, 10.2]
            .iter()
            .map(|x| vec![*x])
            .collect();
        let labels = dbscan(&points, 0.5, 3);
        // The first point is rejected as a seed, then picked up as a border point.
        assert_eq!(labels[..5], [Some(0); 5]);
        assert_eq!(labels[5], None);
        assert_eq!(labels[6..], [Some(1); 3]);
    }

    #[test]
    fn pca_first_axis_carries_most_variance() {
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| {
                let t = i as f64;
                vec![t, 2.0 * t, 0.01 * (t % 2.0)]
            })
            .collect();
        let scores = pca_project(&rows, 2);
        let var = |k: usize| {
            let mean = scores.iter().map(|s| s[k]).sum::<f64>() / 20.0;
            scores.iter().map(|s| (s[k] - mean).powi(2)).sum::<f64>()
        };
        assert!(var(0) > 1000.0 * var(1));
    }

    #[test]
    fn too_few_epochs_is_insufficient_data() {
        let data = vec![0.0; 100];
        let beats = [beat_at(0, 20), beat_at(1, 50), beat_at(2, 80)];
        let settings = ShapeSettings {
            window_size: 10,
            min_samples: 4,
            ..ShapeSettings::default()
        };
        let err = call_abnormal_shapes(&data, &beats, &settings).unwrap_err();
        assert_eq!(
            err,
            EngineError::InsufficientData {
                valid: 3,
                required: 4
            }
        );
    }

    #[test]
    fn flags_aberrant_complexes() {
        let ecg = synthetic_ecg(&SyntheticEcg {
            aberrant_beats: vec![6, 16, 26],
            ..SyntheticEcg::default()
        });
        let cfg = DetectionConfig {
            ecg_filter: false,
            abs_thresh: Some(0.6),
            ..DetectionConfig::default()
        };
        let detection = detect_beats(&ecg.signal, &cfg).unwrap();
        let flags =
            call_abnormal_shapes(&detection.conditioned, &detection.beats, &ShapeSettings::default())
                .unwrap();
        assert_eq!(flags.len(), detection.beats.len());

        let flagged: Vec<f64> = detection
            .beats
            .iter()
            .zip(&flags)
            .filter_map(|(b, f)| f.then_some(b.timestamp))
            .collect();
        assert_eq!(flagged.len(), ecg.aberrant_times.len());
        for (got, expected) in flagged.iter().zip(&ecg.aberrant_times) {
            assert!((got - expected).abs() < 0.02, "{got} vs {expected}");
        }
    }
}

/// Local maxima of `data` at or above `height`, thinned so that no two kept
/// peaks are closer than `distance` samples.
///
/// Flat-topped maxima resolve to the middle sample of the plateau. When two
/// peaks are too close, the taller one wins.
pub fn find_peaks(data: &[f64], height: Option<f64>, distance: usize) -> Vec<usize> {
    let mut peaks = local_maxima(data);
    if let Some(h) = height {
        peaks.retain(|&i| data[i] >= h);
    }
    if distance > 1 && peaks.len() > 1 {
        peaks = select_by_distance(data, &peaks, distance);
    }
    peaks
}

fn local_maxima(data: &[f64]) -> Vec<usize> {
    let n = data.len();
    let mut out = Vec::new();
    if n < 3 {
        return out;
    }
    let mut i = 1;
    while i < n - 1 {
        if data[i - 1] < data[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && data[ahead] == data[i] {
                ahead += 1;
            }
            if data[ahead] < data[i] {
                let right = ahead - 1;
                out.push((i + right) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    out
}

fn select_by_distance(data: &[f64], peaks: &[usize], distance: usize) -> Vec<usize> {
    let mut keep = vec![true; peaks.len()];
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| data[peaks[a]].total_cmp(&data[peaks[b]]));

    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            k -= 1;
            keep[k] = false;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, k)| k.then_some(p))
        .collect()
}

/// Linear-interpolated percentile (`q` in 0..=100), or `None` for empty or
/// non-finite input.
pub fn percentile(data: &[f64], q: f64) -> Option<f64> {
    if data.is_empty() || !q.is_finite() {
        return None;
    }
    let mut sorted: Vec<f64> = data.iter().copied().filter(|x| !x.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let pos = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Mean of the samples immediately before and after `index`, leaving the
/// sample itself out. Only one neighbour is used at the record edges.
pub fn neighbour_mean(data: &[f64], index: usize) -> Option<f64> {
    let mut acc = 0.0;
    let mut count = 0usize;
    if index > 0 {
        if let Some(v) = data.get(index - 1) {
            acc += v;
            count += 1;
        }
    }
    if let Some(v) = data.get(index + 1) {
        acc += v;
        count += 1;
    }
    (count > 0).then(|| acc / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_simple_maxima() {
        let data = [0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0];
        assert_eq!(find_peaks(&data, None, 1), vec![1, 3, 5]);
    }

    #[test]
    fn height_filters_small_peaks() {
        let data = [0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0];
        assert_eq!(find_peaks(&data, Some(2.0), 1), vec![3, 5]);
    }

    #[test]
    fn plateau_resolves_to_middle() {
        let data = [0.0, 1.0, 1.0, 1.0, 0.0];
        assert_eq!(find_peaks(&data, None, 1), vec![2]);
        let data = [0.0, 1.0, 1.0, 0.0];
        assert_eq!(find_peaks(&data, None, 1), vec![1]);
    }

    #[test]
    fn edges_are_never_peaks() {
        let data = [5.0, 1.0, 0.0, 1.0, 5.0];
        assert!(find_peaks(&data, None, 1).is_empty());
    }

    #[test]
    fn distance_keeps_taller_neighbour() {
        let data = [0.0, 2.0, 0.0, 3.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        assert_eq!(find_peaks(&data, None, 3), vec![3, 7]);
        assert_eq!(find_peaks(&data, None, 5), vec![3]);
    }

    #[test]
    fn percentile_interpolates() {
        let data = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&data, 0.0), Some(1.0));
        assert_eq!(percentile(&data, 100.0), Some(4.0));
        assert!((percentile(&data, 50.0).unwrap() - 2.5).abs() < 1e-12);
        assert!(percentile(&[], 50.0).is_none());
    }

    #[test]
    fn neighbour_mean_excludes_centre() {
        let data = [1.0, 10.0, 3.0];
        assert_eq!(neighbour_mean(&data, 1), Some(2.0));
        assert_eq!(neighbour_mean(&data, 0), Some(10.0));
        assert_eq!(neighbour_mean(&data, 2), Some(10.0));
        assert_eq!(neighbour_mean(&[1.0], 0), None);
    }
}

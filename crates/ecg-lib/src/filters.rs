use crate::error::{EngineError, Result};
use log::warn;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Which response to design.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Highpass { cutoff_hz: f64 },
    Bandstop { low_hz: f64, high_hz: f64 },
}

/// One second-order section, `H(z) = (b0 + b1 z^-1 + b2 z^-2) / (1 + a1 z^-1 + a2 z^-2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 2],
}

impl Biquad {
    fn dc_gain(&self) -> Option<f64> {
        let den = 1.0 + self.a[0] + self.a[1];
        if den.abs() < f64::EPSILON {
            None
        } else {
            Some((self.b[0] + self.b[1] + self.b[2]) / den)
        }
    }

    /// Steady-state Direct Form II Transposed state for a unit step input.
    fn step_state(&self) -> [f64; 2] {
        match self.dc_gain() {
            Some(g) => {
                let s1 = self.b[2] - self.a[1] * g;
                let s0 = self.b[1] - self.a[0] * g + s1;
                [s0, s1]
            }
            None => [0.0, 0.0],
        }
    }

    fn is_first_order(&self) -> bool {
        self.b[2] == 0.0 && self.a[1] == 0.0
    }

    fn scale_b(mut self, k: f64) -> Self {
        for b in self.b.iter_mut() {
            *b *= k;
        }
        self
    }
}

/// Highpass with the sampling rate and cutoff in Hz.
pub fn highpass(data: &[f64], fs: f64, cutoff_hz: f64, order: usize) -> Result<Vec<f64>> {
    zero_phase(data, fs, FilterKind::Highpass { cutoff_hz }, order)
}

/// Design a Butterworth filter (bilinear transform, pre-warped cutoffs) and
/// apply it forward-backward so peaks are not shifted in time.
///
/// Returns a series of the same length as `data`. Constant input through a
/// highpass yields (near) zeros rather than an error.
pub fn zero_phase(data: &[f64], fs: f64, kind: FilterKind, order: usize) -> Result<Vec<f64>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let sos = design_butterworth(order, kind, fs)?;
    Ok(sosfiltfilt(&sos, data))
}

pub fn design_butterworth(order: usize, kind: FilterKind, fs: f64) -> Result<Vec<Biquad>> {
    if order == 0 {
        return Err(EngineError::invalid("filter order must be at least 1"));
    }
    if !(fs.is_finite() && fs > 0.0) {
        return Err(EngineError::invalid(format!("invalid sampling rate {fs}")));
    }
    let nyquist = fs / 2.0;
    let check = |f: f64, name: &str| -> Result<()> {
        if f > 0.0 && f < nyquist {
            Ok(())
        } else {
            Err(EngineError::invalid(format!(
                "{name} {f} Hz must lie strictly between 0 and Nyquist ({nyquist} Hz)"
            )))
        }
    };
    let sections = match kind {
        FilterKind::Highpass { cutoff_hz } => {
            check(cutoff_hz, "cutoff")?;
            butterworth_highpass(order, cutoff_hz, fs)
        }
        FilterKind::Bandstop { low_hz, high_hz } => {
            check(low_hz, "low edge")?;
            check(high_hz, "high edge")?;
            if low_hz >= high_hz {
                return Err(EngineError::invalid(format!(
                    "bandstop edges must satisfy low < high, got {low_hz} >= {high_hz}"
                )));
            }
            butterworth_bandstop(order, low_hz, high_hz, fs)
        }
    };
    if sections.iter().any(|s| !is_stable(s)) {
        warn!("filter design {kind:?} (order {order}) produced a marginally stable section");
    }
    Ok(sections)
}

fn is_stable(s: &Biquad) -> bool {
    s.a[1].abs() < 1.0 && s.a[0].abs() < 1.0 + s.a[1]
}

fn prewarp(freq_hz: f64, fs: f64) -> f64 {
    2.0 * fs * (PI * freq_hz / fs).tan()
}

/// Analog lowpass prototype poles on the unit circle, left half-plane.
fn butterworth_poles(order: usize) -> Vec<Complex64> {
    (0..order)
        .map(|k| {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            Complex64::new(theta.cos(), theta.sin())
        })
        .collect()
}

fn bilinear(s: Complex64, fs: f64) -> Complex64 {
    let k = 2.0 * fs;
    (k + s) / (k - s)
}

fn denominator(p1: Complex64, p2: Complex64) -> [f64; 2] {
    [-(p1 + p2).re, (p1 * p2).re]
}

fn butterworth_highpass(order: usize, cutoff_hz: f64, fs: f64) -> Vec<Biquad> {
    let wc = prewarp(cutoff_hz, fs);
    let poles = butterworth_poles(order);
    let mut sections = Vec::with_capacity(order.div_ceil(2));
    for p in poles.iter().take(order / 2) {
        let z = bilinear(wc / *p, fs);
        let section = Biquad {
            b: [1.0, -2.0, 1.0],
            a: denominator(z, z.conj()),
        };
        sections.push(normalize_at_nyquist(section));
    }
    if order % 2 == 1 {
        let z = bilinear(Complex64::new(-wc, 0.0), fs);
        let section = Biquad {
            b: [1.0, -1.0, 0.0],
            a: [-z.re, 0.0],
        };
        sections.push(normalize_at_nyquist(section));
    }
    sections
}

fn butterworth_bandstop(order: usize, low_hz: f64, high_hz: f64, fs: f64) -> Vec<Biquad> {
    let wl = prewarp(low_hz, fs);
    let wh = prewarp(high_hz, fs);
    let w0 = (wl * wh).sqrt();
    let bw = wh - wl;
    let zero = bilinear(Complex64::new(0.0, w0), fs);
    let b = [1.0, -2.0 * zero.re, zero.norm_sqr()];

    // s' = bw * s / (s^2 + w0^2) maps each prototype pole to two analog poles.
    let split = |p: Complex64| -> (Complex64, Complex64) {
        let disc = (Complex64::new(bw * bw, 0.0) - 4.0 * p * p * w0 * w0).sqrt();
        ((bw + disc) / (2.0 * p), (bw - disc) / (2.0 * p))
    };

    let poles = butterworth_poles(order);
    let mut sections = Vec::with_capacity(order);
    for p in poles.iter().take(order / 2) {
        let (s1, s2) = split(*p);
        for s in [s1, s2] {
            let z = bilinear(s, fs);
            sections.push(normalize_at_dc(Biquad {
                b,
                a: denominator(z, z.conj()),
            }));
        }
    }
    if order % 2 == 1 {
        let (s1, s2) = split(Complex64::new(-1.0, 0.0));
        sections.push(normalize_at_dc(Biquad {
            b,
            a: denominator(bilinear(s1, fs), bilinear(s2, fs)),
        }));
    }
    sections
}

fn normalize_at_nyquist(s: Biquad) -> Biquad {
    let num = s.b[0] - s.b[1] + s.b[2];
    let den = 1.0 - s.a[0] + s.a[1];
    if num.abs() < f64::EPSILON {
        return s;
    }
    s.scale_b(den / num)
}

fn normalize_at_dc(s: Biquad) -> Biquad {
    let num = s.b[0] + s.b[1] + s.b[2];
    let den = 1.0 + s.a[0] + s.a[1];
    if num.abs() < f64::EPSILON {
        return s;
    }
    s.scale_b(den / num)
}

/// Run a cascade once over `data`, starting from per-section states `zi`.
pub fn sosfilt(sos: &[Biquad], data: &[f64], zi: &mut [[f64; 2]]) -> Vec<f64> {
    let mut out = data.to_vec();
    for (section, state) in sos.iter().zip(zi.iter_mut()) {
        for sample in out.iter_mut() {
            let x = *sample;
            let y = section.b[0] * x + state[0];
            state[0] = section.b[1] * x - section.a[0] * y + state[1];
            state[1] = section.b[2] * x - section.a[1] * y;
            *sample = y;
        }
    }
    out
}

/// Step-response initial states for the cascade, each section scaled by the
/// DC gain of the sections ahead of it.
pub fn sosfilt_zi(sos: &[Biquad]) -> Vec<[f64; 2]> {
    let mut scale = 1.0;
    sos.iter()
        .map(|section| {
            let state = section.step_state();
            let zi = [state[0] * scale, state[1] * scale];
            scale *= section.dc_gain().unwrap_or(0.0);
            zi
        })
        .collect()
}

/// Forward-backward filtering with odd-extension padding.
pub fn sosfiltfilt(sos: &[Biquad], data: &[f64]) -> Vec<f64> {
    let n = data.len();
    if n == 0 || sos.is_empty() {
        return data.to_vec();
    }
    let first_order = sos.iter().filter(|s| s.is_first_order()).count();
    let padlen = 3 * (2 * sos.len() + 1 - first_order);
    let edge = padlen.min(n - 1);
    let extended = odd_extend(data, edge);
    let zi = sosfilt_zi(sos);

    let x0 = extended[0];
    let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * x0, z[1] * x0]).collect();
    let mut forward = sosfilt(sos, &extended, &mut state);

    forward.reverse();
    let y0 = forward[0];
    let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * y0, z[1] * y0]).collect();
    let mut backward = sosfilt(sos, &forward, &mut state);
    backward.reverse();

    backward[edge..edge + n].to_vec()
}

fn odd_extend(data: &[f64], edge: usize) -> Vec<f64> {
    let n = data.len();
    let first = data[0];
    let last = data[n - 1];
    let mut out = Vec::with_capacity(n + 2 * edge);
    out.extend((1..=edge).rev().map(|i| 2.0 * first - data[i]));
    out.extend_from_slice(data);
    out.extend((n - 1 - edge..n - 1).rev().map(|i| 2.0 * last - data[i]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(fs: f64, freq: f64, seconds: f64) -> Vec<f64> {
        let n = (fs * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    fn rms(data: &[f64]) -> f64 {
        (data.iter().map(|x| x * x).sum::<f64>() / data.len() as f64).sqrt()
    }

    fn response(sos: &[Biquad], freq: f64, fs: f64) -> f64 {
        let w = 2.0 * PI * freq / fs;
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;
        sos.iter()
            .map(|s| {
                let num = s.b[0] + s.b[1] * z1 + s.b[2] * z2;
                let den = 1.0 + s.a[0] * z1 + s.a[1] * z2;
                (num / den).norm()
            })
            .product()
    }

    #[test]
    fn highpass_design_has_half_power_at_cutoff() {
        for order in 1..=5 {
            let sos = design_butterworth(order, FilterKind::Highpass { cutoff_hz: 5.0 }, 250.0)
                .unwrap();
            assert_eq!(sos.len(), order.div_ceil(2));
            let gain = response(&sos, 5.0, 250.0);
            assert!(
                (gain - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6,
                "order {order}: gain {gain}"
            );
            assert!((response(&sos, 124.9, 250.0) - 1.0).abs() < 1e-3);
            assert!(response(&sos, 0.001, 250.0) < 1e-3);
        }
    }

    #[test]
    fn bandstop_design_rejects_center_and_passes_dc() {
        let sos = design_butterworth(
            2,
            FilterKind::Bandstop {
                low_hz: 55.0,
                high_hz: 65.0,
            },
            1000.0,
        )
        .unwrap();
        assert_eq!(sos.len(), 2);
        let w0 = (prewarp(55.0, 1000.0) * prewarp(65.0, 1000.0)).sqrt();
        let center = 1000.0 / PI * (w0 / 2000.0).atan();
        assert!(response(&sos, 0.0, 1000.0) > 0.999);
        assert!(response(&sos, 400.0, 1000.0) > 0.99);
        assert!(response(&sos, center, 1000.0) < 1e-3);
        assert!((response(&sos, 55.0, 1000.0) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-3);
    }

    #[test]
    fn highpass_removes_slow_drift_without_shifting_peaks() {
        let fs = 250.0;
        let slow = sine(fs, 0.2, 8.0);
        let mut data: Vec<f64> = slow.iter().map(|x| 3.0 * x).collect();
        data[1000] += 5.0;
        let filtered = highpass(&data, fs, 5.0, 2).unwrap();
        assert_eq!(filtered.len(), data.len());
        let peak = filtered
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 1000);
        let quiet: Vec<f64> = filtered[100..900].to_vec();
        assert!(rms(&quiet) < 0.05, "drift leaked: {}", rms(&quiet));
    }

    #[test]
    fn constant_series_filters_to_near_zero() {
        let data = vec![2.5; 500];
        let filtered = highpass(&data, 100.0, 5.0, 4).unwrap();
        assert!(filtered.iter().all(|x| x.abs() < 1e-6));
    }

    #[test]
    fn very_short_series_does_not_panic() {
        for n in 1..6 {
            let data = vec![1.0; n];
            let filtered = highpass(&data, 100.0, 5.0, 2).unwrap();
            assert_eq!(filtered.len(), n);
        }
        assert!(highpass(&[], 100.0, 5.0, 2).unwrap().is_empty());
    }

    #[test]
    fn bandstop_removes_mains_hum() {
        let fs = 1000.0;
        let hum = sine(fs, 60.0, 4.0);
        let filtered = zero_phase(
            &hum,
            fs,
            FilterKind::Bandstop {
                low_hz: 55.0,
                high_hz: 65.0,
            },
            2,
        )
        .unwrap();
        assert!(rms(&filtered[500..3500]) < 0.05 * rms(&hum));
    }

    #[test]
    fn rejects_cutoff_outside_nyquist() {
        let err = highpass(&[1.0, 2.0, 3.0], 10.0, 5.0, 2).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(highpass(&[1.0, 2.0], 10.0, 0.0, 2).is_err());
        assert!(highpass(&[1.0, 2.0], 10.0, 1.0, 0).is_err());
    }
}

use crate::{review::Session, signal::Signal};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Marker {
    Circle,
    Triangle,
    Cross,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub marker: Marker,
    pub size: u32,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Markers(MarkerSeries),
}

impl Series {
    pub fn name(&self) -> &str {
        match self {
            Series::Line(s) => &s.name,
            Series::Markers(s) => &s.name,
        }
    }

    pub fn points(&self) -> &[[f64; 2]] {
        match self {
            Series::Line(s) => &s.points,
            Series::Markers(s) => &s.points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// `(x_min, x_max, y_min, y_max)` over every series, or `None` when empty.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut points = self.series.iter().flat_map(|s| s.points().iter());
        let first = points.next()?;
        let init = (first[0], first[0], first[1], first[1]);
        Some(points.fold(init, |(x0, x1, y0, y1), p| {
            (x0.min(p[0]), x1.max(p[0]), y0.min(p[1]), y1.max(p[1]))
        }))
    }
}

pub trait PlotBackend {
    fn draw(&mut self, fig: &Figure) -> anyhow::Result<()>;
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

/// Time window shown in a review figure; `None` ends mean the record edge.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeWindow {
    pub start: Option<f64>,
    pub stop: Option<f64>,
}

impl TimeWindow {
    pub fn contains(&self, t: f64) -> bool {
        self.start.map_or(true, |s| t >= s) && self.stop.map_or(true, |e| t <= e)
    }
}

/// Review figure: the trace plus markers for every beat, the arrhythmia view,
/// the current arrhythmia and bad-data beats.
pub fn figure_from_session(
    title: &str,
    signal: &Signal,
    session: &Session,
    window: TimeWindow,
    max_points: usize,
) -> Figure {
    let points: Vec<[f64; 2]> = signal
        .time
        .iter()
        .zip(&signal.voltage)
        .filter(|(t, _)| window.contains(**t))
        .map(|(t, v)| [*t, *v])
        .collect();
    let top = points.iter().map(|p| p[1]).fold(f64::NEG_INFINITY, f64::max);
    let level = if top.is_finite() { top * 1.1 } else { 1.0 };

    let mut fig = Figure::new(Some(title.into()));
    fig.x.label = Some("time (s)".into());
    fig.y.label = Some("voltage".into());
    fig.add_series(Series::Line(LineSeries {
        name: "ECG".into(),
        points: decimate_points(&points, max_points),
        style: Style {
            width: 1.0,
            color: Color(0x1F77B4),
        },
    }));

    let voltage_at = |idx: usize| signal.voltage.get(idx).copied().unwrap_or(0.0);
    let beats: Vec<[f64; 2]> = session
        .beats()
        .iter()
        .filter(|b| window.contains(b.timestamp))
        .map(|b| [b.timestamp, voltage_at(b.sample_index)])
        .collect();
    fig.add_series(markers("beats", beats, Marker::Circle, 3, 0x2CA02C));

    let arrhythmias: Vec<[f64; 2]> = session
        .view()
        .iter()
        .filter_map(|id| session.beat(*id))
        .filter(|b| window.contains(b.timestamp))
        .map(|b| [b.timestamp, level])
        .collect();
    fig.add_series(markers("arrhythmias", arrhythmias, Marker::Triangle, 6, 0xD62728));

    if let Some(current) = session.current_beat().filter(|b| window.contains(b.timestamp)) {
        fig.add_series(markers(
            "current arrhythmia",
            vec![[current.timestamp, level]],
            Marker::Cross,
            8,
            0x000000,
        ));
    }

    let bad: Vec<[f64; 2]> = session
        .rows()
        .filter(|(b, a)| a.bad_data && window.contains(b.timestamp))
        .map(|(b, _)| [b.timestamp, voltage_at(b.sample_index)])
        .collect();
    if !bad.is_empty() {
        fig.add_series(markers("bad data", bad, Marker::Cross, 5, 0x7F7F7F));
    }
    fig
}

fn markers(name: &str, points: Vec<[f64; 2]>, marker: Marker, size: u32, color: u32) -> Series {
    Series::Markers(MarkerSeries {
        name: name.into(),
        points,
        marker,
        size,
        color: Color(color),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arrhythmia::ClassifierSettings,
        detectors::beats::{detect_beats, DetectionConfig},
        simulate::{synthetic_ecg, SyntheticEcg},
    };

    #[test]
    fn decimation_caps_length() {
        let points: Vec<[f64; 2]> = (0..1000).map(|i| [i as f64, 0.0]).collect();
        assert_eq!(decimate_points(&points, 100).len(), 100);
        assert_eq!(decimate_points(&points[..10], 100).len(), 10);
    }

    #[test]
    fn session_figure_has_markers_within_window() {
        let ecg = synthetic_ecg(&SyntheticEcg {
            premature_after: vec![10],
            ..SyntheticEcg::default()
        });
        let detection = detect_beats(&ecg.signal, &DetectionConfig::default()).unwrap();
        let mut session = Session::new(detection.beats.clone());
        let settings = ClassifierSettings {
            rules: crate::arrhythmia::RuleSettings {
                bradycardia_absolute_hr: 20.0,
                premature_beat_multiple_rr: 0.7,
                ..Default::default()
            },
            ..ClassifierSettings::default()
        };
        session.classify(None, &settings).unwrap();
        assert!(!session.view().is_empty());
        session.mark_bad_range(0.0, 5.0);

        let window = TimeWindow {
            start: Some(0.0),
            stop: Some(15.0),
        };
        let fig = figure_from_session("rec", &ecg.signal, &session, window, 500);
        let names: Vec<&str> = fig.series.iter().map(Series::name).collect();
        assert_eq!(
            names,
            vec!["ECG", "beats", "arrhythmias", "current arrhythmia", "bad data"]
        );
        assert!(fig.series[0].points().len() <= 500);
        let (x0, x1, _, _) = fig.bounds().unwrap();
        assert!(x0 >= 0.0 && x1 <= 15.0);
    }
}

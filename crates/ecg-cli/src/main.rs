use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ecg_lib::{
    arrhythmia::{ArrhythmiaMethod, Category},
    config::{self, AnalysisConfig, Preset},
    detectors::beats::{detect_beats, BeatDetection},
    io::{report::write_report, table},
    plot::{figure_from_session, Figure, Marker, PlotBackend, Series, TimeWindow},
    review::Session,
    signal::{Beat, BeatId, Signal},
    simulate::{synthetic_ecg, SyntheticEcg},
};
use plotters::prelude::*;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "ecg",
    version,
    about = "ECG beat detection, arrhythmia classification and review export"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect beats and print them as JSON
    Detect {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        analysis: AnalysisArgs,
    },
    /// Detect and classify beats, printing flag counts and flagged beats
    Classify {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        analysis: AnalysisArgs,
    },
    /// Detect, classify and export the beat table and bad-data marks as CSV
    Report {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        analysis: AnalysisArgs,
        #[arg(long)]
        out_dir: PathBuf,
        /// File stem for the exported sheets (defaults to the input stem)
        #[arg(long)]
        stem: Option<String>,
        /// Time range to mark as bad data, `start:stop` in seconds (repeatable)
        #[arg(long = "bad-range", value_parser = parse_range)]
        bad_ranges: Vec<(f64, f64)>,
        /// Assign a category to the beat at or after a time, `time=category` (repeatable)
        #[arg(long = "assign", value_parser = parse_assignment)]
        assignments: Vec<(f64, Category)>,
    },
    /// Render the trace with beat and arrhythmia markers to a PNG via plotters
    Plot {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        analysis: AnalysisArgs,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        start: Option<f64>,
        #[arg(long)]
        stop: Option<f64>,
        #[arg(long, default_value_t = 4000)]
        max_points: usize,
    },
    /// Write a synthetic ECG table with known beat times
    Simulate {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 250.0)]
        fs: f64,
        #[arg(long, default_value_t = 30.0)]
        duration_s: f64,
        #[arg(long, default_value_t = 72.0)]
        heart_rate_bpm: f64,
        /// Regular beat index followed by a premature beat (repeatable)
        #[arg(long = "premature-after")]
        premature_after: Vec<usize>,
        #[arg(long, default_value_t = 0.3)]
        premature_offset_s: f64,
        /// Regular beat index drawn with an aberrant complex (repeatable)
        #[arg(long = "aberrant")]
        aberrant_beats: Vec<usize>,
        #[arg(long, default_value_t = 0.01)]
        noise_amplitude: f64,
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Signal table (CSV with a header row)
    #[arg(long)]
    input: PathBuf,
    /// Time column; `ts` or `time` is used when omitted
    #[arg(long)]
    time_column: Option<String>,
    /// Voltage column; the first non-time column is used when omitted
    #[arg(long)]
    channel: Option<String>,
    #[arg(long, default_value_t = ',')]
    delimiter: char,
    /// Treat the input as newline-delimited voltages sampled at this rate
    #[arg(long)]
    fs: Option<f64>,
    /// Load the table through polars instead of the csv reader
    #[cfg(feature = "polars")]
    #[arg(long, conflicts_with = "fs")]
    polars: bool,
}

impl InputArgs {
    fn load(&self) -> Result<Signal> {
        if let Some(fs) = self.fs {
            return table::read_voltage_series(&self.input, fs);
        }
        if !self.delimiter.is_ascii() {
            bail!("delimiter must be a single ASCII character");
        }
        #[cfg(feature = "polars")]
        if self.polars {
            if self.delimiter != ',' {
                bail!("--polars reads comma-separated tables only");
            }
            let path = self
                .input
                .to_str()
                .ok_or_else(|| anyhow!("input path is not UTF-8: {}", self.input.display()))?;
            let table = table::polars_io::read_signal_table(path, self.time_column.as_deref())?;
            return table.signal(self.channel.as_deref());
        }
        let table = table::read_signal_csv(
            &self.input,
            self.time_column.as_deref(),
            self.delimiter as u8,
        )?;
        table.signal(self.channel.as_deref())
    }

    fn stem(&self) -> String {
        self.input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("ecg")
            .to_string()
    }
}

#[derive(Args)]
struct AnalysisArgs {
    /// TOML analysis config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Detection preset: anesthetized or ecgenie
    #[arg(long)]
    preset: Option<Preset>,
    /// Heuristic, Unsupervised or Both
    #[arg(long)]
    method: Option<ArrhythmiaMethod>,
    #[arg(long = "min-rr")]
    min_rr_ms: Option<f64>,
    #[arg(long)]
    invert: bool,
    #[arg(long)]
    abs_value: bool,
    #[arg(long)]
    no_filter: bool,
    #[arg(long)]
    filt_order: Option<usize>,
    #[arg(long)]
    filt_cutoff: Option<f64>,
    #[arg(long)]
    abs_thresh: Option<f64>,
    #[arg(long)]
    perc_thresh: Option<f64>,
    /// Enable the breath filter with this cutoff
    #[arg(long)]
    breath_filter_cutoff: Option<f64>,
    #[arg(long)]
    bradycardia_hr: Option<f64>,
    #[arg(long)]
    tachycardia_hr: Option<f64>,
    #[arg(long)]
    skipped_multiple: Option<f64>,
    #[arg(long)]
    premature_multiple: Option<f64>,
    #[arg(long)]
    window_size: Option<usize>,
    #[arg(long)]
    eps: Option<f64>,
    #[arg(long)]
    min_samples: Option<usize>,
}

impl AnalysisArgs {
    fn resolve(&self) -> Result<AnalysisConfig> {
        let mut cfg = match &self.config {
            Some(path) => config::load(path)?,
            None => AnalysisConfig::default(),
        };
        if let Some(preset) = self.preset {
            cfg.detection = preset.detection();
        }
        let det = &mut cfg.detection;
        if let Some(v) = self.min_rr_ms {
            det.min_rr_ms = v;
        }
        det.ecg_invert |= self.invert;
        det.ecg_abs_value |= self.abs_value;
        if self.no_filter {
            det.ecg_filter = false;
        }
        if let Some(v) = self.filt_order {
            det.ecg_filt_order = v;
        }
        if let Some(v) = self.filt_cutoff {
            det.ecg_filt_cutoff = v;
        }
        if self.abs_thresh.is_some() {
            det.abs_thresh = self.abs_thresh;
        }
        if self.perc_thresh.is_some() {
            det.perc_thresh = self.perc_thresh;
        }
        if let Some(v) = self.breath_filter_cutoff {
            det.breath_filter = true;
            det.breath_filter_cutoff = v;
        }

        if let Some(m) = self.method {
            cfg.arr_methods = m;
        }
        let rules = &mut cfg.rules;
        if let Some(v) = self.bradycardia_hr {
            rules.bradycardia_absolute_hr = v;
        }
        if let Some(v) = self.tachycardia_hr {
            rules.tachycardia_absolute_hr = v;
        }
        if let Some(v) = self.skipped_multiple {
            rules.skipped_beat_multiple_rr = v;
        }
        if let Some(v) = self.premature_multiple {
            rules.premature_beat_multiple_rr = v;
        }
        let shape = &mut cfg.shape;
        if let Some(v) = self.window_size {
            shape.window_size = v;
        }
        if let Some(v) = self.eps {
            shape.eps = v;
        }
        if let Some(v) = self.min_samples {
            shape.min_samples = v;
        }
        log::debug!("analysis config: {cfg:?}");
        Ok(cfg)
    }
}

fn parse_range(s: &str) -> std::result::Result<(f64, f64), String> {
    let (a, b) = s
        .split_once(':')
        .ok_or_else(|| format!("expected start:stop, got '{s}'"))?;
    let a: f64 = a.trim().parse().map_err(|e| format!("bad start '{a}': {e}"))?;
    let b: f64 = b.trim().parse().map_err(|e| format!("bad stop '{b}': {e}"))?;
    Ok((a, b))
}

fn parse_assignment(s: &str) -> std::result::Result<(f64, Category), String> {
    let (t, cat) = s
        .split_once('=')
        .ok_or_else(|| format!("expected time=category, got '{s}'"))?;
    let t: f64 = t.trim().parse().map_err(|e| format!("bad time '{t}': {e}"))?;
    Ok((t, cat.parse()?))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Detect { input, analysis } => cmd_detect(&input, &analysis)?,
        Commands::Classify { input, analysis } => cmd_classify(&input, &analysis)?,
        Commands::Report {
            input,
            analysis,
            out_dir,
            stem,
            bad_ranges,
            assignments,
        } => cmd_report(
            &input,
            &analysis,
            &out_dir,
            stem.unwrap_or_else(|| input.stem()),
            &bad_ranges,
            &assignments,
        )?,
        Commands::Plot {
            input,
            analysis,
            out,
            start,
            stop,
            max_points,
        } => cmd_plot(&input, &analysis, &out, TimeWindow { start, stop }, max_points)?,
        Commands::Simulate {
            out,
            fs,
            duration_s,
            heart_rate_bpm,
            premature_after,
            premature_offset_s,
            aberrant_beats,
            noise_amplitude,
            seed,
        } => cmd_simulate(
            &out,
            SyntheticEcg {
                fs,
                duration_s,
                heart_rate_bpm,
                premature_after,
                premature_offset_s,
                aberrant_beats,
                noise_amplitude,
                seed,
                ..SyntheticEcg::default()
            },
        )?,
    }
    Ok(())
}

#[derive(Serialize)]
struct DetectOutput<'a> {
    fs: f64,
    threshold: f64,
    peaks: usize,
    beats: &'a [Beat],
}

fn cmd_detect(input: &InputArgs, analysis: &AnalysisArgs) -> Result<()> {
    let signal = input.load()?;
    let cfg = analysis.resolve()?;
    let detection = detect_beats(&signal, &cfg.detection)?;
    let out = DetectOutput {
        fs: detection.fs,
        threshold: detection.threshold,
        peaks: detection.peaks.len(),
        beats: &detection.beats,
    };
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

/// Detection followed by classification into a fresh review session.
fn analyse(
    signal: &Signal,
    cfg: &AnalysisConfig,
) -> Result<(BeatDetection, Session, Option<String>)> {
    let detection = detect_beats(signal, &cfg.detection)?;
    let mut session = Session::new(detection.beats.clone());
    let classification = session.classify(Some(&detection.conditioned), &cfg.classifier())?;
    let shape_error = classification.shape_error.map(|e| e.to_string());
    Ok((detection, session, shape_error))
}

#[derive(Serialize)]
struct FlaggedBeat {
    id: BeatId,
    ts: f64,
    #[serde(rename = "RR")]
    rr: f64,
    categories: Vec<Category>,
}

#[derive(Serialize)]
struct ClassifyOutput {
    method: ArrhythmiaMethod,
    beats: usize,
    flagged: usize,
    counts: BTreeMap<Category, usize>,
    arrhythmias: Vec<FlaggedBeat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shape_error: Option<String>,
}

fn summarize(cfg: &AnalysisConfig, session: &Session, shape_error: Option<String>) -> ClassifyOutput {
    let mut counts: BTreeMap<Category, usize> = session
        .computed_categories()
        .iter()
        .map(|c| (*c, 0))
        .collect();
    for (_, annotation) in session.rows() {
        for (category, flag) in &annotation.flags {
            if *flag {
                *counts.entry(*category).or_default() += 1;
            }
        }
    }
    let arrhythmias = session
        .view()
        .iter()
        .filter_map(|id| Some((session.beat(*id)?, session.annotation(*id)?)))
        .map(|(beat, annotation)| FlaggedBeat {
            id: beat.id,
            ts: beat.timestamp,
            rr: beat.rr,
            categories: annotation
                .flags
                .iter()
                .filter_map(|(c, f)| f.then_some(*c))
                .collect(),
        })
        .collect();
    ClassifyOutput {
        method: cfg.arr_methods,
        beats: session.beats().len(),
        flagged: session.view().len(),
        counts,
        arrhythmias,
        shape_error,
    }
}

fn cmd_classify(input: &InputArgs, analysis: &AnalysisArgs) -> Result<()> {
    let signal = input.load()?;
    let cfg = analysis.resolve()?;
    let (_, session, shape_error) = analyse(&signal, &cfg)?;
    let out = summarize(&cfg, &session, shape_error);
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

fn cmd_report(
    input: &InputArgs,
    analysis: &AnalysisArgs,
    out_dir: &Path,
    stem: String,
    bad_ranges: &[(f64, f64)],
    assignments: &[(f64, Category)],
) -> Result<()> {
    let signal = input.load()?;
    let cfg = analysis.resolve()?;
    let (_, mut session, shape_error) = analyse(&signal, &cfg)?;
    for &(start, stop) in bad_ranges {
        session.mark_bad_range(start, stop);
    }
    for &(t, category) in assignments {
        if session.select_beat_at(t).is_none() {
            bail!("no beat at or after {t} s to assign {category}");
        }
        session.assign_category(category);
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let paths = write_report(&session, out_dir, &stem)?;
    let summary = summarize(&cfg, &session, shape_error);
    let out = serde_json::json!({
        "beats_csv": paths.beats,
        "bad_data_marks_csv": paths.bad_data_marks,
        "beats": summary.beats,
        "flagged": summary.flagged,
        "bad_ranges": session.bad_ranges(),
    });
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

fn cmd_plot(
    input: &InputArgs,
    analysis: &AnalysisArgs,
    out: &Path,
    window: TimeWindow,
    max_points: usize,
) -> Result<()> {
    let signal = input.load()?;
    let cfg = analysis.resolve()?;
    let (_, session, _) = analyse(&signal, &cfg)?;
    let fig = figure_from_session(&input.stem(), &signal, &session, window, max_points);
    PngBackend::new(out, (1200, 480)).draw(&fig)?;
    Ok(())
}

fn cmd_simulate(out: &Path, spec: SyntheticEcg) -> Result<()> {
    let rec = synthetic_ecg(&spec);
    table::write_signal_csv(out, &rec.signal, "ecg")?;
    let summary = serde_json::json!({
        "out": out,
        "samples": rec.signal.len(),
        "fs": spec.fs,
        "beat_times": rec.beat_times,
        "premature_times": rec.premature_times,
        "aberrant_times": rec.aberrant_times,
    });
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

struct PngBackend {
    path: PathBuf,
    size: (u32, u32),
}

impl PngBackend {
    fn new(path: &Path, size: (u32, u32)) -> Self {
        Self {
            path: path.to_path_buf(),
            size,
        }
    }
}

impl PlotBackend for PngBackend {
    fn draw(&mut self, fig: &Figure) -> Result<()> {
        let (x_min, mut x_max, y_min, mut y_max) =
            fig.bounds().ok_or_else(|| anyhow!("nothing to plot"))?;
        if x_max <= x_min {
            x_max = x_min + 1.0;
        }
        if y_max <= y_min {
            y_max = y_min + 1.0;
        }
        let root = BitMapBackend::new(&self.path, self.size).into_drawing_area();
        root.fill(&WHITE)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .caption(
                fig.title.clone().unwrap_or_else(|| "ECG".into()),
                ("sans-serif", 24),
            )
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
        let mut mesh = chart.configure_mesh();
        if let Some(label) = &fig.x.label {
            mesh.x_desc(label.as_str());
        }
        if let Some(label) = &fig.y.label {
            mesh.y_desc(label.as_str());
        }
        mesh.draw()?;

        for series in &fig.series {
            match series {
                Series::Line(line) => {
                    let (r, g, b) = line.style.color.rgb();
                    let style = RGBColor(r, g, b).stroke_width(line.style.width.max(1.0) as u32);
                    chart.draw_series(LineSeries::new(
                        line.points.iter().map(|p| (p[0], p[1])),
                        style,
                    ))?;
                }
                Series::Markers(markers) => {
                    let (r, g, b) = markers.color.rgb();
                    let style = RGBColor(r, g, b).filled();
                    let size = markers.size;
                    let points = markers.points.iter().map(|p| (p[0], p[1]));
                    match markers.marker {
                        Marker::Circle => {
                            chart.draw_series(points.map(|p| Circle::new(p, size, style)))?;
                        }
                        Marker::Triangle => {
                            chart.draw_series(points.map(|p| TriangleMarker::new(p, size, style)))?;
                        }
                        Marker::Cross => {
                            chart.draw_series(points.map(|p| Cross::new(p, size, style)))?;
                        }
                    }
                }
            }
        }
        root.present()?;
        log::info!("wrote {}", self.path.display());
        Ok(())
    }
}

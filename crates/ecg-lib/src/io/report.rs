use crate::{arrhythmia::Category, review::Session};
use anyhow::{Context, Result};
use csv::Writer;
use serde::Serialize;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Serialize)]
pub struct ReportPaths {
    pub beats: PathBuf,
    pub bad_data_marks: PathBuf,
}

impl ReportPaths {
    /// `<dir>/<stem>_beats.csv` and `<dir>/<stem>_bad_data_marks.csv`.
    pub fn for_stem(dir: &Path, stem: &str) -> Self {
        Self {
            beats: dir.join(format!("{stem}_beats.csv")),
            bad_data_marks: dir.join(format!("{stem}_bad_data_marks.csv")),
        }
    }
}

pub fn write_report(session: &Session, dir: &Path, stem: &str) -> Result<ReportPaths> {
    let paths = ReportPaths::for_stem(dir, stem);
    write_beats(session, &paths.beats)?;
    write_bad_data_marks(session, &paths.bad_data_marks)?;
    log::info!(
        "wrote {} beats to {} and {} marks to {}",
        session.beats().len(),
        paths.beats.display(),
        session.bad_ranges().len(),
        paths.bad_data_marks.display()
    );
    Ok(paths)
}

/// Flag columns appear for the categories computed by the last
/// classification; annotation columns for those plus any reviewer-assigned
/// category.
pub fn beat_columns(session: &Session) -> Vec<String> {
    let computed = session.computed_categories();
    let annotated: BTreeSet<Category> = computed
        .iter()
        .copied()
        .chain(session.annotated_categories())
        .collect();
    let mut columns: Vec<String> = ["id", "sample_index", "ts", "RR", "HR", "amplitude"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    columns.extend(computed.iter().map(|c| c.column_name().to_string()));
    columns.push("any_arrhythmia".into());
    columns.extend(annotated.iter().map(|c| c.annotation_column()));
    columns.push("annot_any_arrhythmia".into());
    columns.push("bad_data".into());
    columns
}

pub fn write_beats(session: &Session, path: &Path) -> Result<()> {
    let mut writer =
        Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    let computed = session.computed_categories();
    let annotated: BTreeSet<Category> = computed
        .iter()
        .copied()
        .chain(session.annotated_categories())
        .collect();
    writer.write_record(beat_columns(session))?;
    for (beat, annotation) in session.rows() {
        let mut record = vec![
            beat.id.0.to_string(),
            beat.sample_index.to_string(),
            beat.timestamp.to_string(),
            beat.rr.to_string(),
            beat.hr.to_string(),
            beat.amplitude.to_string(),
        ];
        record.extend(
            computed
                .iter()
                .map(|c| annotation.flags.get(c).copied().unwrap_or(false).to_string()),
        );
        record.push(annotation.any_arrhythmia.to_string());
        record.extend(
            annotated
                .iter()
                .map(|c| annotation.annotation(*c).as_i8().to_string()),
        );
        record.push(annotation.annot_any_arrhythmia.as_i8().to_string());
        record.push(annotation.bad_data.to_string());
        writer
            .write_record(&record)
            .with_context(|| format!("writing beat {}", beat.id))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_bad_data_marks(session: &Session, path: &Path) -> Result<()> {
    let mut writer =
        Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["start", "stop"])?;
    for range in session.bad_ranges() {
        writer.write_record([range.start.to_string(), range.stop.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

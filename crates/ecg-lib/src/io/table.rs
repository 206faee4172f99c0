use crate::signal::Signal;
use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use std::{fs::File, io::Read, path::Path};

/// Header names recognised as the time column, in priority order.
pub const TIME_COLUMNS: [&str; 2] = ["ts", "time"];

/// A uniform-sampled table: one time column plus named voltage channels.
#[derive(Debug, Clone)]
pub struct SignalTable {
    pub time_column: String,
    pub time: Vec<f64>,
    pub channels: Vec<(String, Vec<f64>)>,
}

impl SignalTable {
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// The named channel, or the first one when `name` is `None`.
    pub fn signal(&self, name: Option<&str>) -> Result<Signal> {
        let (label, voltage) = match name {
            Some(name) => self
                .channels
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    anyhow!(
                        "missing voltage column ({name}); available: {:?}",
                        self.channel_names()
                    )
                })?,
            None => self
                .channels
                .first()
                .ok_or_else(|| anyhow!("table has no voltage columns"))?,
        };
        log::debug!("using channel {label} ({} samples)", voltage.len());
        Ok(Signal::new(self.time.clone(), voltage.clone())?)
    }
}

pub fn read_signal_csv(path: &Path, time_column: Option<&str>, delimiter: u8) -> Result<SignalTable> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_signal_csv(file, time_column, delimiter)
        .with_context(|| format!("reading signal table {}", path.display()))
}

pub fn parse_signal_csv<R: Read>(
    reader: R,
    time_column: Option<&str>,
    delimiter: u8,
) -> Result<SignalTable> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);
    let headers = reader.headers().context("reading header")?.clone();
    let time_idx = match time_column {
        Some(name) => locate_column(&headers, name)?,
        None => TIME_COLUMNS
            .iter()
            .find_map(|name| locate_column(&headers, name).ok())
            .ok_or_else(|| anyhow!("no time column found (looked for {TIME_COLUMNS:?})"))?,
    };

    let channel_idx: Vec<usize> = (0..headers.len()).filter(|&i| i != time_idx).collect();
    if channel_idx.is_empty() {
        bail!("table has a time column but no voltage columns");
    }
    let mut time = Vec::new();
    let mut channels: Vec<Vec<f64>> = vec![Vec::new(); channel_idx.len()];
    for (row, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("reading record {}", row + 1))?;
        time.push(parse_cell(&record, time_idx, row)?);
        for (values, &idx) in channels.iter_mut().zip(&channel_idx) {
            values.push(parse_cell(&record, idx, row)?);
        }
    }
    if time.len() < 2 {
        bail!("signal table needs at least 2 rows, found {}", time.len());
    }

    Ok(SignalTable {
        time_column: headers[time_idx].to_string(),
        time,
        channels: channel_idx
            .iter()
            .map(|&i| headers[i].to_string())
            .zip(channels)
            .collect(),
    })
}

fn parse_cell(record: &StringRecord, idx: usize, row: usize) -> Result<f64> {
    let raw = record
        .get(idx)
        .ok_or_else(|| anyhow!("record {} is missing column {}", row + 1, idx + 1))?;
    raw.parse::<f64>()
        .with_context(|| format!("record {} column {} is not f64: {raw}", row + 1, idx + 1))
}

fn locate_column(headers: &StringRecord, requested: &str) -> Result<usize> {
    headers
        .iter()
        .position(|name| name.eq_ignore_ascii_case(requested))
        .ok_or_else(|| anyhow!("missing column ({requested})"))
}

/// Newline-delimited voltages sampled at `fs`, ignoring blank and `#` lines.
pub fn parse_voltage_series(text: &str, fs: f64) -> Result<Signal> {
    let mut voltage = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let val: f64 = trimmed
            .parse()
            .with_context(|| format!("line {} is not f64: {}", idx + 1, trimmed))?;
        voltage.push(val);
    }
    if voltage.is_empty() {
        bail!("no numeric samples found");
    }
    Ok(Signal::from_uniform(fs, voltage))
}

pub fn read_voltage_series(path: &Path, fs: f64) -> Result<Signal> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_voltage_series(&text, fs)
}

/// Write `signal` as a two-column `ts,<channel>` table.
pub fn write_signal_csv(path: &Path, signal: &Signal, channel: &str) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([TIME_COLUMNS[0], channel])?;
    for (t, v) in signal.time.iter().zip(&signal.voltage) {
        writer.write_record([t.to_string(), v.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(feature = "polars")]
pub mod polars_io {
    use super::{SignalTable, TIME_COLUMNS};
    use anyhow::{anyhow, Result};
    use polars::prelude::*;

    fn column_f64(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
        let s = df.column(name)?.cast(&DataType::Float64)?;
        Ok(s.f64()?.into_no_null_iter().collect())
    }

    /// DataFrame-backed loader with the same column rules as `read_signal_csv`.
    pub fn read_signal_table(path: &str, time_column: Option<&str>) -> Result<SignalTable> {
        let df = CsvReadOptions::default()
            .try_into_reader_with_file_path(Some(path.into()))?
            .finish()?;
        let names: Vec<String> = df.get_columns().iter().map(|s| s.name().to_string()).collect();
        let time_name = match time_column {
            Some(name) => names.iter().find(|n| n.eq_ignore_ascii_case(name)),
            None => names
                .iter()
                .find(|n| TIME_COLUMNS.iter().any(|t| n.eq_ignore_ascii_case(t))),
        }
        .cloned()
        .ok_or_else(|| anyhow!("no time column found in {path}"))?;

        let mut channels = Vec::new();
        for name in names.iter().filter(|n| **n != time_name) {
            channels.push((name.clone(), column_f64(&df, name)?));
        }
        Ok(SignalTable {
            time: column_f64(&df, &time_name)?,
            time_column: time_name,
            channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_time_column_and_channels() {
        let text = "time,ecg,resp\n0.0,0.1,1.0\n0.01,0.2,1.1\n0.02,0.3,1.2\n";
        let table = parse_signal_csv(text.as_bytes(), None, b',').unwrap();
        assert_eq!(table.time_column, "time");
        assert_eq!(table.channel_names(), vec!["ecg", "resp"]);
        let resp = table.signal(Some("RESP")).unwrap();
        assert_eq!(resp.voltage, vec![1.0, 1.1, 1.2]);
        let first = table.signal(None).unwrap();
        assert_eq!(first.voltage, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn ts_wins_over_time() {
        let text = "ecg,time,ts\n1,5,0\n2,6,1\n";
        let table = parse_signal_csv(text.as_bytes(), None, b',').unwrap();
        assert_eq!(table.time, vec![0.0, 1.0]);
        assert_eq!(table.channel_names(), vec!["ecg", "time"]);
    }

    #[test]
    fn explicit_time_column_and_delimiter() {
        let text = "sec\tlead\n0\t1\n0.5\t2\n";
        let table = parse_signal_csv(text.as_bytes(), Some("sec"), b'\t').unwrap();
        assert_eq!(table.time, vec![0.0, 0.5]);
        assert!(table.signal(Some("missing")).is_err());
    }

    #[test]
    fn rejects_tables_without_time_or_channels() {
        assert!(parse_signal_csv("a,b\n1,2\n3,4\n".as_bytes(), None, b',').is_err());
        assert!(parse_signal_csv("ts\n1\n2\n".as_bytes(), None, b',').is_err());
        assert!(parse_signal_csv("ts,ecg\n0,x\n1,2\n".as_bytes(), None, b',').is_err());
    }

    #[test]
    fn voltage_series_skips_comments() {
        let signal = parse_voltage_series("# header\n1.0\n\n2.0\n3.0\n", 2.0).unwrap();
        assert_eq!(signal.voltage, vec![1.0, 2.0, 3.0]);
        assert_eq!(signal.time, vec![0.0, 0.5, 1.0]);
        assert!(parse_voltage_series("# nothing\n", 1.0).is_err());
    }

    #[cfg(feature = "polars")]
    #[test]
    fn polars_loader_matches_csv_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sig.csv");
        std::fs::write(&path, "ecg,time\n0.5,0.0\n-0.25,0.25\n1.0,0.5\n").unwrap();
        let from_csv = read_signal_csv(&path, None, b',').unwrap();
        let from_polars = polars_io::read_signal_table(path.to_str().unwrap(), None).unwrap();
        assert_eq!(from_polars.time_column, "time");
        assert_eq!(from_polars.time, from_csv.time);
        assert_eq!(from_polars.channel_names(), vec!["ecg"]);
        assert_eq!(
            from_polars.signal(Some("ecg")).unwrap().voltage,
            from_csv.signal(Some("ecg")).unwrap().voltage
        );
        assert!(polars_io::read_signal_table(path.to_str().unwrap(), Some("sec")).is_err());
    }

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sig.csv");
        let signal = Signal::from_uniform(4.0, vec![0.5, -0.25, 1.0]);
        write_signal_csv(&path, &signal, "ecg").unwrap();
        let table = read_signal_csv(&path, None, b',').unwrap();
        assert_eq!(table.time_column, "ts");
        assert_eq!(table.signal(Some("ecg")).unwrap().voltage, signal.voltage);
    }
}

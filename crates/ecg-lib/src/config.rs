use crate::{
    arrhythmia::{ArrhythmiaMethod, ClassifierSettings, RuleSettings, ShapeSettings},
    detectors::beats::DetectionConfig,
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, str::FromStr};

/// Every tunable the engine reads, grouped the way analysis files lay them out:
///
/// ```toml
/// arr_methods = "Both"
///
/// [detection]
/// min_RR = 60
/// perc_thresh = 97
///
/// [rules]
/// premature_beat_multiple_rr = 0.7
///
/// [shape]
/// window_size = 200
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub arr_methods: ArrhythmiaMethod,
    pub detection: DetectionConfig,
    pub rules: RuleSettings,
    pub shape: ShapeSettings,
}

impl AnalysisConfig {
    pub fn classifier(&self) -> ClassifierSettings {
        ClassifierSettings {
            arr_methods: self.arr_methods,
            rules: self.rules,
            shape: self.shape,
        }
    }

    pub fn with_preset(preset: Preset) -> Self {
        Self {
            detection: preset.detection(),
            ..Self::default()
        }
    }
}

/// Named detection settings for known recording setups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Anesthetized,
    Ecgenie,
}

impl Preset {
    pub fn detection(self) -> DetectionConfig {
        match self {
            Preset::Anesthetized => DetectionConfig::anesthetized(),
            Preset::Ecgenie => DetectionConfig::ecgenie(),
        }
    }
}

impl FromStr for Preset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anesthetized" => Ok(Preset::Anesthetized),
            "ecgenie" => Ok(Preset::Ecgenie),
            other => bail!("unknown preset '{other}' (expected anesthetized or ecgenie)"),
        }
    }
}

pub fn from_toml_str(contents: &str) -> Result<AnalysisConfig> {
    toml::from_str(contents).context("parsing analysis config")
}

/// Read a config file. A missing file yields the defaults.
pub fn load(path: &Path) -> Result<AnalysisConfig> {
    if !path.exists() {
        log::info!("no config at {}, using defaults", path.display());
        return Ok(AnalysisConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
}

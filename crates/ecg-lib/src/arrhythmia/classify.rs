use super::{any_of, rules, shape, Category, CategoryFlags, RuleSettings, ShapeSettings};
use crate::{
    error::{EngineError, Result},
    signal::Beat,
};
use log::{info, warn};
use serde::{Deserialize, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// Which classifier stages run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrhythmiaMethod {
    #[default]
    #[serde(alias = "Heuristics", alias = "heuristic")]
    Heuristic,
    #[serde(alias = "unsupervised")]
    Unsupervised,
    #[serde(alias = "both")]
    Both,
}

impl ArrhythmiaMethod {
    pub fn runs_rules(self) -> bool {
        matches!(self, Self::Heuristic | Self::Both)
    }

    pub fn runs_shape(self) -> bool {
        matches!(self, Self::Unsupervised | Self::Both)
    }
}

impl fmt::Display for ArrhythmiaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Heuristic => "Heuristic",
            Self::Unsupervised => "Unsupervised",
            Self::Both => "Both",
        };
        f.write_str(name)
    }
}

impl FromStr for ArrhythmiaMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" | "heuristics" => Ok(Self::Heuristic),
            "unsupervised" => Ok(Self::Unsupervised),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "unknown arrhythmia method '{other}' (expected Heuristic, Unsupervised or Both)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub arr_methods: ArrhythmiaMethod,
    pub rules: RuleSettings,
    pub shape: ShapeSettings,
}

/// Automatic flags from one classification run.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub method: ArrhythmiaMethod,
    /// Only the categories computed this run.
    pub categories: Vec<CategoryFlags>,
    pub any_arrhythmia: Vec<bool>,
    /// Set when `Both` was requested and shape clustering could not run.
    #[serde(
        serialize_with = "serialize_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub shape_error: Option<EngineError>,
}

impl Classification {
    pub fn len(&self) -> usize {
        self.any_arrhythmia.len()
    }

    pub fn is_empty(&self) -> bool {
        self.any_arrhythmia.is_empty()
    }

    pub fn flags(&self, category: Category) -> Option<&[bool]> {
        self.categories
            .iter()
            .find(|f| f.category == category)
            .map(|f| f.values.as_slice())
    }

    pub fn flagged_count(&self) -> usize {
        self.any_arrhythmia.iter().filter(|v| **v).count()
    }
}

fn serialize_error<S: Serializer>(
    err: &Option<EngineError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match err {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Run the classifier stages selected by `settings.arr_methods`.
///
/// The shape stage needs the conditioned trace the beats were detected on;
/// asking for it without one is a configuration error raised before any
/// work is done. With `Both`, an `InsufficientData` failure from the shape
/// stage is recorded on the result and the rule flags are still returned.
pub fn classify(
    beats: &[Beat],
    conditioned: Option<&[f64]>,
    settings: &ClassifierSettings,
) -> Result<Classification> {
    let method = settings.arr_methods;
    if method.runs_shape() && conditioned.is_none() {
        return Err(EngineError::configuration(format!(
            "{method} classification needs the conditioned signal"
        )));
    }

    let mut categories = Vec::new();
    let mut shape_error = None;
    if method.runs_rules() {
        categories.extend(rules::call_arrhythmias(beats, &settings.rules));
    }
    if let (true, Some(trace)) = (method.runs_shape(), conditioned) {
        match shape::call_abnormal_shapes(trace, beats, &settings.shape) {
            Ok(values) => categories.push(CategoryFlags {
                category: Category::AbnCluster,
                values,
            }),
            Err(err @ EngineError::InsufficientData { .. }) if method == ArrhythmiaMethod::Both => {
                warn!("shape classifier skipped, keeping rule results: {err}");
                shape_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    // Manual-only; always present and all false.
    categories.push(CategoryFlags {
        category: Category::OtherArrhythmia,
        values: vec![false; beats.len()],
    });

    let any_arrhythmia = any_of(&categories, beats.len());
    let result = Classification {
        method,
        categories,
        any_arrhythmia,
        shape_error,
    };
    info!(
        "{method} classification flagged {} of {} beats",
        result.flagged_count(),
        beats.len()
    );
    Ok(result)
}

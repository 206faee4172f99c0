pub mod classify;
pub mod rules;
pub mod shape;

pub use classify::{classify, ArrhythmiaMethod, Classification, ClassifierSettings};
pub use rules::RuleSettings;
pub use shape::ShapeSettings;

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Arrhythmia categories a beat can be labelled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BradycardiaAbsolute,
    TachycardiaAbsolute,
    SkippedBeat,
    PremBeat,
    AbnCluster,
    /// Never assigned automatically.
    OtherArrhythmia,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::BradycardiaAbsolute,
        Category::TachycardiaAbsolute,
        Category::SkippedBeat,
        Category::PremBeat,
        Category::AbnCluster,
        Category::OtherArrhythmia,
    ];

    /// Categories produced by the rule-based classifier.
    pub const RULES: [Category; 4] = [
        Category::BradycardiaAbsolute,
        Category::TachycardiaAbsolute,
        Category::SkippedBeat,
        Category::PremBeat,
    ];

    pub fn column_name(self) -> &'static str {
        match self {
            Category::BradycardiaAbsolute => "bradycardia_absolute",
            Category::TachycardiaAbsolute => "tachycardia_absolute",
            Category::SkippedBeat => "skipped_beat",
            Category::PremBeat => "prem_beat",
            Category::AbnCluster => "abn_cluster",
            Category::OtherArrhythmia => "other_arrhythmia",
        }
    }

    pub fn annotation_column(self) -> String {
        format!("annot_{}", self.column_name())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts both the plain column name and its `annot_` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let name = name.strip_prefix("annot_").unwrap_or(name);
        Category::ALL
            .into_iter()
            .find(|c| c.column_name() == name)
            .ok_or_else(|| {
                let known: Vec<&str> = Category::ALL.iter().map(|c| c.column_name()).collect();
                format!("unknown arrhythmia category '{s}' (expected one of {known:?})")
            })
    }
}

/// One boolean per beat for a single category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryFlags {
    pub category: Category,
    pub values: Vec<bool>,
}

impl CategoryFlags {
    pub fn count(&self) -> usize {
        self.values.iter().filter(|v| **v).count()
    }
}

/// Logical OR across whichever category columns are present.
pub fn any_of(flags: &[CategoryFlags], len: usize) -> Vec<bool> {
    (0..len)
        .map(|i| flags.iter().any(|f| f.values.get(i).copied().unwrap_or(false)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_plain_and_annotation_names() {
        assert_eq!("prem_beat".parse::<Category>(), Ok(Category::PremBeat));
        assert_eq!(
            "annot_other_arrhythmia".parse::<Category>(),
            Ok(Category::OtherArrhythmia)
        );
        assert!("any_arrhythmia".parse::<Category>().is_err());
    }

    #[test]
    fn any_of_only_sees_present_columns() {
        let flags = vec![
            CategoryFlags {
                category: Category::SkippedBeat,
                values: vec![false, true, false],
            },
            CategoryFlags {
                category: Category::PremBeat,
                values: vec![false, false, true],
            },
        ];
        assert_eq!(any_of(&flags, 3), vec![false, true, true]);
        assert_eq!(any_of(&[], 2), vec![false, false]);
    }
}

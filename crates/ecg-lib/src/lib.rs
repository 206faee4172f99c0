pub mod arrhythmia;
pub mod config;
pub mod detectors;
pub mod error;
pub mod filters;
pub mod io;
pub mod plot;
pub mod review;
pub mod signal;
pub mod simulate;

pub use arrhythmia::{classify, ArrhythmiaMethod, Category, Classification, ClassifierSettings};
pub use config::AnalysisConfig;
pub use detectors::*;
pub use error::{EngineError, Result};
pub use review::{AnnotationValue, Session};
pub use signal::*;

#[cfg(test)]
mod scenarios;

#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod bootstrap;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod quantile;
pub mod types;

#[path = "../shared/files.rs"]
pub mod shared_files;
#[path = "../shared/report.rs"]
pub mod shared_report;
pub mod shared {
    pub use super::shared_files as files;
    pub use super::shared_report as report;
}

#[path = "../gee/mod.rs"]
pub mod gee;

#[path = "../dca/mod.rs"]
pub mod dca;

pub use bootstrap::{BootstrapAnalyzer, BootstrapComparison, BootstrapError};
pub use config::AnalysisConfig;
pub use dca::{DcaComparison, DcaCurve, DecisionCurveAnalyzer};
pub use gee::model::{GeeAnalyzer, GeeFit};
pub use types::{ClassificationRecord, ConfusionMatrix, Mode, RateMetric};

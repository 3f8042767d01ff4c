//! Record and count types shared by every engine.
//!
//! A reader study produces, for each reader and each reading mode, a sequence of
//! [`ClassificationRecord`]s. Several records may belong to the same patient (one per
//! lesion or finding); the patient is the cluster for every cluster-robust procedure
//! in this crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reading condition of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The reader had AI assistance.
    Assisted,
    /// The reader worked without AI assistance.
    Unaided,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Assisted, Mode::Unaided];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Assisted => "assisted",
            Mode::Unaided => "unaided",
        }
    }

    /// Value of the mode column in a GEE design matrix (1 = assisted, 0 = unaided).
    pub fn indicator(&self) -> f64 {
        match self {
            Mode::Assisted => 1.0,
            Mode::Unaided => 0.0,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized mode '{0}' (expected 'assisted' or 'unaided')")]
pub struct ParseModeError(pub String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assisted" | "ai" | "with_ai" | "1" => Ok(Mode::Assisted),
            "unaided" | "no_ai" | "without_ai" | "0" => Ok(Mode::Unaided),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// The four cells of a binary confusion table, as recorded per patient in reader files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    #[serde(rename = "TP")]
    TruePositive,
    #[serde(rename = "FP")]
    FalsePositive,
    #[serde(rename = "FN")]
    FalseNegative,
    #[serde(rename = "TN")]
    TrueNegative,
}

impl ResultCode {
    /// `(ground_truth, prediction)` pair this code stands for.
    pub fn labels(&self) -> (bool, bool) {
        match self {
            ResultCode::TruePositive => (true, true),
            ResultCode::FalsePositive => (false, true),
            ResultCode::FalseNegative => (true, false),
            ResultCode::TrueNegative => (false, false),
        }
    }

    pub fn from_labels(ground_truth: bool, prediction: bool) -> Self {
        match (ground_truth, prediction) {
            (true, true) => ResultCode::TruePositive,
            (false, true) => ResultCode::FalsePositive,
            (true, false) => ResultCode::FalseNegative,
            (false, false) => ResultCode::TrueNegative,
        }
    }

    /// TP and TN are correct classifications; FP and FN are not.
    pub fn is_correct(&self) -> bool {
        matches!(self, ResultCode::TruePositive | ResultCode::TrueNegative)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::TruePositive => "TP",
            ResultCode::FalsePositive => "FP",
            ResultCode::FalseNegative => "FN",
            ResultCode::TrueNegative => "TN",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized result code '{0}' (expected TP, FP, FN or TN)")]
pub struct ParseResultCodeError(pub String);

impl FromStr for ResultCode {
    type Err = ParseResultCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TP" => Ok(ResultCode::TruePositive),
            "FP" => Ok(ResultCode::FalsePositive),
            "FN" => Ok(ResultCode::FalseNegative),
            "TN" => Ok(ResultCode::TrueNegative),
            other => Err(ParseResultCodeError(other.to_string())),
        }
    }
}

/// One classified unit (a patient, or one lesion of a patient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub patient_id: String,
    pub ground_truth: bool,
    pub prediction: bool,
}

impl ClassificationRecord {
    pub fn new(patient_id: impl Into<String>, ground_truth: bool, prediction: bool) -> Self {
        Self {
            patient_id: patient_id.into(),
            ground_truth,
            prediction,
        }
    }

    pub fn from_result_code(patient_id: impl Into<String>, code: ResultCode) -> Self {
        let (ground_truth, prediction) = code.labels();
        Self::new(patient_id, ground_truth, prediction)
    }

    pub fn result_code(&self) -> ResultCode {
        ResultCode::from_labels(self.ground_truth, self.prediction)
    }

    pub fn is_correct(&self) -> bool {
        self.ground_truth == self.prediction
    }
}

/// Counts of a binary confusion table. `total()` is the number of classified units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    #[serde(rename = "TP")]
    pub true_positive: u64,
    #[serde(rename = "FP")]
    pub false_positive: u64,
    #[serde(rename = "FN")]
    pub false_negative: u64,
    #[serde(rename = "TN")]
    pub true_negative: u64,
}

impl ConfusionMatrix {
    pub fn new(
        true_positive: u64,
        false_positive: u64,
        false_negative: u64,
        true_negative: u64,
    ) -> Self {
        Self {
            true_positive,
            false_positive,
            false_negative,
            true_negative,
        }
    }

    /// Tallies `(ground_truth, prediction)` pairs.
    pub fn from_labels<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = (bool, bool)>,
    {
        let mut cm = Self::default();
        for (ground_truth, prediction) in labels {
            cm.record(ResultCode::from_labels(ground_truth, prediction));
        }
        cm
    }

    pub fn from_records(records: &[ClassificationRecord]) -> Self {
        Self::from_labels(records.iter().map(|r| (r.ground_truth, r.prediction)))
    }

    pub fn record(&mut self, code: ResultCode) {
        match code {
            ResultCode::TruePositive => self.true_positive += 1,
            ResultCode::FalsePositive => self.false_positive += 1,
            ResultCode::FalseNegative => self.false_negative += 1,
            ResultCode::TrueNegative => self.true_negative += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.true_positive + self.false_positive + self.false_negative + self.true_negative
    }

    pub fn actual_positives(&self) -> u64 {
        self.true_positive + self.false_negative
    }

    /// (TP + FN) / N, or 0.0 for an empty table.
    pub fn prevalence(&self) -> f64 {
        ratio(self.actual_positives(), self.total())
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TP={}, FP={}, FN={}, TN={}",
            self.true_positive, self.false_positive, self.false_negative, self.true_negative
        )
    }
}

/// `numerator / denominator`, with an empty denominator mapped to exactly 0.0.
pub fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// The four patient-level rate metrics estimated by every engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateMetric {
    Sensitivity,
    Specificity,
    Ppv,
    Npv,
}

impl RateMetric {
    pub const ALL: [RateMetric; 4] = [
        RateMetric::Sensitivity,
        RateMetric::Specificity,
        RateMetric::Ppv,
        RateMetric::Npv,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RateMetric::Sensitivity => "sensitivity",
            RateMetric::Specificity => "specificity",
            RateMetric::Ppv => "ppv",
            RateMetric::Npv => "npv",
        }
    }

    /// Upper-case label used in report tables.
    pub fn label(&self) -> &'static str {
        match self {
            RateMetric::Sensitivity => "SENSITIVITY",
            RateMetric::Specificity => "SPECIFICITY",
            RateMetric::Ppv => "PPV",
            RateMetric::Npv => "NPV",
        }
    }
}

impl fmt::Display for RateMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per [`RateMetric`], serialized as a keyed object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet<T> {
    pub sensitivity: T,
    pub specificity: T,
    pub ppv: T,
    pub npv: T,
}

impl<T> MetricSet<T> {
    pub fn from_fn<F>(mut f: F) -> Self
    where
        F: FnMut(RateMetric) -> T,
    {
        Self {
            sensitivity: f(RateMetric::Sensitivity),
            specificity: f(RateMetric::Specificity),
            ppv: f(RateMetric::Ppv),
            npv: f(RateMetric::Npv),
        }
    }

    pub fn get(&self, metric: RateMetric) -> &T {
        match metric {
            RateMetric::Sensitivity => &self.sensitivity,
            RateMetric::Specificity => &self.specificity,
            RateMetric::Ppv => &self.ppv,
            RateMetric::Npv => &self.npv,
        }
    }

    pub fn get_mut(&mut self, metric: RateMetric) -> &mut T {
        match metric {
            RateMetric::Sensitivity => &mut self.sensitivity,
            RateMetric::Specificity => &mut self.specificity,
            RateMetric::Ppv => &mut self.ppv,
            RateMetric::Npv => &mut self.npv,
        }
    }

    /// Metrics in canonical order (sensitivity, specificity, PPV, NPV).
    pub fn iter(&self) -> impl Iterator<Item = (RateMetric, &T)> {
        RateMetric::ALL.into_iter().map(move |m| (m, self.get(m)))
    }
}

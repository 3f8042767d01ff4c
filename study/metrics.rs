//! Patient-level and lesion-level classification metrics.
//!
//! Records are grouped into patient clusters in first-appearance order. The same
//! grouping drives patient-level reduction here and cluster resampling in the
//! bootstrap engine, so both see identical cluster boundaries.

use crate::types::{ClassificationRecord, ConfusionMatrix, MetricSet, RateMetric, ratio};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// How the records of one patient collapse into a single patient-level label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionPolicy {
    /// Logical OR: the patient is positive if any record is positive.
    #[default]
    Max,
    /// Positive only when strictly more than half of the records are positive.
    Majority,
}

impl ReductionPolicy {
    pub fn reduce(&self, labels: &[bool]) -> bool {
        match self {
            ReductionPolicy::Max => labels.iter().any(|&l| l),
            ReductionPolicy::Majority => {
                let positives = labels.iter().filter(|&&l| l).count();
                2 * positives > labels.len()
            }
        }
    }
}

/// Record indices grouped by patient, patients in first-appearance order.
#[derive(Debug, Clone, Default)]
pub struct PatientClusters {
    ids: Vec<String>,
    members: Vec<Vec<usize>>,
}

impl PatientClusters {
    pub fn from_records(records: &[ClassificationRecord]) -> Self {
        let mut position: AHashMap<&str, usize> = AHashMap::with_capacity(records.len());
        let mut clusters = Self::default();
        for (row, record) in records.iter().enumerate() {
            let slot = *position.entry(record.patient_id.as_str()).or_insert_with(|| {
                clusters.ids.push(record.patient_id.clone());
                clusters.members.push(Vec::new());
                clusters.ids.len() - 1
            });
            clusters.members[slot].push(row);
        }
        clusters
    }

    /// Number of distinct patients.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn patient_id(&self, cluster: usize) -> &str {
        &self.ids[cluster]
    }

    /// Row indices (into the original record slice) belonging to `cluster`.
    pub fn members(&self, cluster: usize) -> &[usize] {
        &self.members[cluster]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.ids
            .iter()
            .map(String::as_str)
            .zip(self.members.iter().map(Vec::as_slice))
    }
}

/// Collapses records into one record per patient under `policy`.
pub fn aggregate_to_patient_level(
    records: &[ClassificationRecord],
    policy: ReductionPolicy,
) -> Vec<ClassificationRecord> {
    let clusters = PatientClusters::from_records(records);
    let mut truth = Vec::new();
    let mut pred = Vec::new();
    clusters
        .iter()
        .map(|(patient_id, rows)| {
            truth.clear();
            pred.clear();
            truth.extend(rows.iter().map(|&r| records[r].ground_truth));
            pred.extend(rows.iter().map(|&r| records[r].prediction));
            ClassificationRecord::new(patient_id, policy.reduce(&truth), policy.reduce(&pred))
        })
        .collect()
}

/// Sensitivity, specificity, PPV and NPV. A zero denominator yields exactly 0.0.
pub fn rate_metrics(cm: &ConfusionMatrix) -> MetricSet<f64> {
    MetricSet::from_fn(|metric| match metric {
        RateMetric::Sensitivity => ratio(cm.true_positive, cm.true_positive + cm.false_negative),
        RateMetric::Specificity => ratio(cm.true_negative, cm.true_negative + cm.false_positive),
        RateMetric::Ppv => ratio(cm.true_positive, cm.true_positive + cm.false_positive),
        RateMetric::Npv => ratio(cm.true_negative, cm.true_negative + cm.false_negative),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeMetrics {
    pub confusion_matrix: ConfusionMatrix,
    pub metrics: MetricSet<f64>,
    pub n_patients: usize,
    pub n_records: usize,
}

impl ModeMetrics {
    pub fn from_records(records: &[ClassificationRecord], policy: ReductionPolicy) -> Self {
        let patients = aggregate_to_patient_level(records, policy);
        let confusion_matrix = ConfusionMatrix::from_records(&patients);
        Self {
            metrics: rate_metrics(&confusion_matrix),
            confusion_matrix,
            n_patients: patients.len(),
            n_records: records.len(),
        }
    }
}

/// Patient-level metrics for both modes and their difference (assisted - unaided).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientComparison {
    pub assisted: ModeMetrics,
    pub unaided: ModeMetrics,
    pub delta: MetricSet<f64>,
}

pub fn compare_modes(
    assisted: &[ClassificationRecord],
    unaided: &[ClassificationRecord],
    policy: ReductionPolicy,
) -> PatientComparison {
    let assisted = ModeMetrics::from_records(assisted, policy);
    let unaided = ModeMetrics::from_records(unaided, policy);
    let delta = MetricSet::from_fn(|m| assisted.metrics.get(m) - unaided.metrics.get(m));

    for (metric, value) in delta.iter() {
        log::info!(
            "{}: assisted {:.4}, unaided {:.4}, delta {:+.4}",
            metric.label(),
            assisted.metrics.get(metric),
            unaided.metrics.get(metric),
            value
        );
    }

    PatientComparison {
        assisted,
        unaided,
        delta,
    }
}

/// Detection metrics on the record-level (non-aggregated) confusion table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LesionMetrics {
    pub confusion_matrix: ConfusionMatrix,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub total_detections: u64,
    pub total_ground_truth: u64,
}

impl LesionMetrics {
    pub fn from_confusion(cm: ConfusionMatrix) -> Self {
        let precision = ratio(cm.true_positive, cm.true_positive + cm.false_positive);
        let recall = ratio(cm.true_positive, cm.true_positive + cm.false_negative);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            confusion_matrix: cm,
            precision,
            recall,
            f1_score,
            total_detections: cm.true_positive + cm.false_positive,
            total_ground_truth: cm.actual_positives(),
        }
    }
}

/// Direction of the precision/recall changes under assistance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionTradeOff {
    /// Precision and recall both improve.
    WinWin,
    /// Precision improves at the cost of recall.
    PrecisionOverRecall,
    /// Recall improves at the cost of precision.
    RecallOverPrecision,
    /// Neither improves.
    NoGain,
}

impl DetectionTradeOff {
    pub fn classify(delta_precision: f64, delta_recall: f64) -> Self {
        if delta_precision > 0.0 && delta_recall < 0.0 {
            DetectionTradeOff::PrecisionOverRecall
        } else if delta_precision < 0.0 && delta_recall > 0.0 {
            DetectionTradeOff::RecallOverPrecision
        } else if delta_precision > 0.0 && delta_recall > 0.0 {
            DetectionTradeOff::WinWin
        } else {
            DetectionTradeOff::NoGain
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            DetectionTradeOff::WinWin => "AI improves both precision and recall.",
            DetectionTradeOff::PrecisionOverRecall => {
                "AI increases precision but decreases recall \
                 (fewer false positives, more false negatives)."
            }
            DetectionTradeOff::RecallOverPrecision => {
                "AI decreases precision but increases recall \
                 (fewer false negatives, more false positives)."
            }
            DetectionTradeOff::NoGain => "AI improves neither precision nor recall.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LesionDelta {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LesionComparison {
    pub assisted: LesionMetrics,
    pub unaided: LesionMetrics,
    pub delta: LesionDelta,
    pub trade_off: DetectionTradeOff,
}

pub fn compare_lesions(
    assisted: &[ClassificationRecord],
    unaided: &[ClassificationRecord],
) -> LesionComparison {
    let assisted = LesionMetrics::from_confusion(ConfusionMatrix::from_records(assisted));
    let unaided = LesionMetrics::from_confusion(ConfusionMatrix::from_records(unaided));
    let delta = LesionDelta {
        precision: assisted.precision - unaided.precision,
        recall: assisted.recall - unaided.recall,
        f1_score: assisted.f1_score - unaided.f1_score,
    };
    let trade_off = DetectionTradeOff::classify(delta.precision, delta.recall);
    log::info!(
        "Lesion level: precision {:+.4}, recall {:+.4}, F1 {:+.4} ({:?})",
        delta.precision,
        delta.recall,
        delta.f1_score,
        trade_off
    );
    LesionComparison {
        assisted,
        unaided,
        delta,
        trade_off,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn rec(id: &str, gt: bool, pred: bool) -> ClassificationRecord {
        ClassificationRecord::new(id, gt, pred)
    }

    #[test]
    fn zero_denominators_yield_zero() {
        let no_positives = ConfusionMatrix::new(0, 3, 0, 5);
        let m = rate_metrics(&no_positives);
        assert_eq!(m.sensitivity, 0.0);
        assert_eq!(m.ppv, 0.0);
        assert_abs_diff_eq!(m.specificity, 5.0 / 8.0);
        assert_eq!(m.npv, 1.0);

        let empty = rate_metrics(&ConfusionMatrix::default());
        for (_, v) in empty.iter() {
            assert_eq!(*v, 0.0);
        }
    }

    #[test]
    fn max_policy_is_logical_or_in_first_appearance_order() {
        let records = vec![
            rec("B", false, false),
            rec("A", true, false),
            rec("B", false, true),
            rec("A", false, false),
        ];
        let patients = aggregate_to_patient_level(&records, ReductionPolicy::Max);
        assert_eq!(patients, vec![rec("B", false, true), rec("A", true, false)]);
    }

    #[test]
    fn majority_policy_requires_strict_majority() {
        assert!(!ReductionPolicy::Majority.reduce(&[true, false]));
        assert!(ReductionPolicy::Majority.reduce(&[true, true, false]));
        assert!(!ReductionPolicy::Majority.reduce(&[]));
        assert!(!ReductionPolicy::Max.reduce(&[]));
    }

    #[test]
    fn clusters_track_record_rows() {
        let records = vec![rec("P1", true, true), rec("P2", false, false), rec("P1", true, false)];
        let clusters = PatientClusters::from_records(&records);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters.patient_id(0), "P1");
        assert_eq!(clusters.members(0), &[0, 2]);
        assert_eq!(clusters.members(1), &[1]);
    }

    #[test]
    fn four_patient_scenario_gives_half_everywhere() {
        let assisted = vec![
            rec("P1", true, true),
            rec("P2", false, false),
            rec("P3", false, true),
            rec("P4", true, false),
        ];
        let unaided = vec![
            rec("P1", true, false),
            rec("P2", false, false),
            rec("P3", false, true),
            rec("P4", true, false),
        ];
        let cmp = compare_modes(&assisted, &unaided, ReductionPolicy::Max);
        assert_eq!(cmp.assisted.confusion_matrix, ConfusionMatrix::new(1, 1, 1, 1));
        for (_, v) in cmp.assisted.metrics.iter() {
            assert_abs_diff_eq!(*v, 0.5);
        }
        assert_abs_diff_eq!(cmp.delta.sensitivity, 0.5);
        assert_eq!(cmp.assisted.n_patients, 4);
    }

    #[test]
    fn lesion_metrics_and_trade_off() {
        let m = LesionMetrics::from_confusion(ConfusionMatrix::new(8, 2, 2, 0));
        assert_abs_diff_eq!(m.precision, 0.8);
        assert_abs_diff_eq!(m.recall, 0.8);
        assert_abs_diff_eq!(m.f1_score, 0.8, epsilon = 1e-12);
        assert_eq!(m.total_detections, 10);
        assert_eq!(m.total_ground_truth, 10);

        let none = LesionMetrics::from_confusion(ConfusionMatrix::new(0, 0, 0, 4));
        assert_eq!(none.f1_score, 0.0);

        assert_eq!(DetectionTradeOff::classify(0.1, 0.2), DetectionTradeOff::WinWin);
        assert_eq!(DetectionTradeOff::classify(0.1, -0.2), DetectionTradeOff::PrecisionOverRecall);
        assert_eq!(DetectionTradeOff::classify(-0.1, 0.2), DetectionTradeOff::RecallOverPrecision);
        assert_eq!(DetectionTradeOff::classify(0.0, 0.0), DetectionTradeOff::NoGain);
    }
}

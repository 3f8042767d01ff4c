//! Cluster-robust bootstrap of patient-level rate metrics.
//!
//! Patients, not records, are the resampling unit: each iteration draws P patient
//! clusters uniformly with replacement from the P observed patients, carries along
//! every record of each drawn patient, collapses the resample to one label per
//! patient and recomputes sensitivity, specificity, PPV and NPV. Aggregation is keyed
//! by patient id, so a patient drawn more than once contributes a single
//! patient-level unit to that iteration's confusion table.
//!
//! The engine owns one `Xoshiro256PlusPlus` stream seeded at construction. Every draw
//! of every mode is taken from that stream in order, so an engine built with the same
//! seed and fed the same records in the same order reproduces its samples exactly.

use crate::config::BootstrapSettings;
use crate::metrics::{PatientClusters, ReductionPolicy, aggregate_to_patient_level, rate_metrics};
use crate::quantile::{mean, percentile_interval, sample_std};
use crate::types::{ClassificationRecord, ConfusionMatrix, MetricSet, Mode, RateMetric, ratio};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("Cannot compute {requested}: the {missing} bootstrap has not been run yet.")]
    PrecursorMissing { requested: String, missing: String },
}

/// Distribution summary of one metric's bootstrap samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// One value per iteration, in iteration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_samples: Vec<f64>,
}

impl MetricSummary {
    pub fn from_samples(samples: Vec<f64>, confidence_level: f64) -> Self {
        let (ci_lower, ci_upper) = percentile_interval(&samples, confidence_level);
        Self {
            mean: mean(&samples),
            std: sample_std(&samples),
            ci_lower,
            ci_upper,
            raw_samples: samples,
        }
    }
}

/// Summary of the paired differences (assisted - unaided) for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaSummary {
    #[serde(flatten)]
    pub summary: MetricSummary,
    /// Share of delta samples on the opposite side of zero from the mean delta.
    /// A coarse one-sided approximation, not a calibrated test.
    pub p_value_approx: f64,
    /// The percentile interval excludes zero.
    pub significant: bool,
}

impl DeltaSummary {
    pub fn from_samples(samples: Vec<f64>, confidence_level: f64) -> Self {
        let summary = MetricSummary::from_samples(samples, confidence_level);
        let n = summary.raw_samples.len() as u64;
        let crossing = if summary.mean > 0.0 {
            summary.raw_samples.iter().filter(|&&d| d <= 0.0).count()
        } else {
            summary.raw_samples.iter().filter(|&&d| d >= 0.0).count()
        };
        let significant = summary.ci_lower > 0.0 || summary.ci_upper < 0.0;
        Self {
            p_value_approx: ratio(crossing as u64, n),
            significant,
            summary,
        }
    }
}

/// Bootstrap result for one reading mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeBootstrap {
    pub mode: Mode,
    pub n_iterations: usize,
    pub confidence_level: f64,
    pub n_patients: usize,
    pub metrics: MetricSet<MetricSummary>,
}

/// Both per-mode bootstraps and the paired deltas between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapComparison {
    pub n_iterations: usize,
    pub confidence_level: f64,
    pub seed: u64,
    pub assisted: ModeBootstrap,
    pub unaided: ModeBootstrap,
    pub delta: MetricSet<DeltaSummary>,
}

impl BootstrapComparison {
    /// Drops every per-iteration sample, keeping only the summaries.
    pub fn strip_raw_samples(&mut self) {
        for metric in RateMetric::ALL {
            self.assisted.metrics.get_mut(metric).raw_samples.clear();
            self.unaided.metrics.get_mut(metric).raw_samples.clear();
            self.delta.get_mut(metric).summary.raw_samples.clear();
        }
    }
}

/// One row of the flattened comparison table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub mode: String,
    pub metric: String,
    pub mean: f64,
    pub std: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

impl SummaryRow {
    fn new(mode: &str, metric: RateMetric, s: &MetricSummary) -> Self {
        Self {
            mode: mode.to_string(),
            metric: metric.label().to_string(),
            mean: s.mean,
            std: s.std,
            ci_lower: s.ci_lower,
            ci_upper: s.ci_upper,
        }
    }
}

pub struct BootstrapAnalyzer {
    settings: BootstrapSettings,
    policy: ReductionPolicy,
    rng: Xoshiro256PlusPlus,
    assisted: Option<ModeBootstrap>,
    unaided: Option<ModeBootstrap>,
}

impl BootstrapAnalyzer {
    pub fn new(settings: BootstrapSettings, policy: ReductionPolicy) -> Self {
        log::info!(
            "Bootstrap analyzer: B={}, CI={}%, seed={}, aggregation={:?}",
            settings.n_iterations,
            settings.confidence_level * 100.0,
            settings.seed,
            policy
        );
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(settings.seed),
            settings,
            policy,
            assisted: None,
            unaided: None,
        }
    }

    pub fn settings(&self) -> &BootstrapSettings {
        &self.settings
    }

    /// Draws P patients with replacement and returns all of their records, in draw order.
    pub fn resample_patients(
        &mut self,
        records: &[ClassificationRecord],
    ) -> Vec<ClassificationRecord> {
        let clusters = PatientClusters::from_records(records);
        let mut out = Vec::with_capacity(records.len());
        for _ in 0..clusters.len() {
            let drawn = self.rng.gen_range(0..clusters.len());
            out.extend(clusters.members(drawn).iter().map(|&row| records[row].clone()));
        }
        out
    }

    /// Collapses records to one per patient under the engine's reduction policy.
    pub fn aggregate(&self, records: &[ClassificationRecord]) -> Vec<ClassificationRecord> {
        aggregate_to_patient_level(records, self.policy)
    }

    /// Resample, aggregate, and compute the four rate metrics once.
    pub fn single_iteration(&mut self, records: &[ClassificationRecord]) -> MetricSet<f64> {
        let resampled = self.resample_patients(records);
        let patients = self.aggregate(&resampled);
        rate_metrics(&ConfusionMatrix::from_records(&patients))
    }

    /// Runs `n_iterations` iterations for one mode and stores the result in that mode's slot.
    pub fn run_bootstrap(&mut self, records: &[ClassificationRecord], mode: Mode) -> ModeBootstrap {
        let n_iterations = self.settings.n_iterations;
        log::info!("Bootstrap started: mode={mode}, B={n_iterations}");

        let prepared = internal::PreparedClusters::new(records, self.policy);
        let mut samples: MetricSet<Vec<f64>> =
            MetricSet::from_fn(|_| Vec::with_capacity(n_iterations));
        let mut drawn = vec![false; prepared.len()];

        for i in 0..n_iterations {
            if (i + 1) % 100 == 0 {
                log::debug!("  bootstrap iteration {}/{}", i + 1, n_iterations);
            }
            let metrics = prepared.draw(&mut self.rng, &mut drawn);
            for metric in RateMetric::ALL {
                samples.get_mut(metric).push(*metrics.get(metric));
            }
        }

        let confidence_level = self.settings.confidence_level;
        let metrics = MetricSet::from_fn(|metric| {
            let summary = MetricSummary::from_samples(
                std::mem::take(samples.get_mut(metric)),
                confidence_level,
            );
            log::info!(
                "  {}: {:.3} ({:.0}% CI: {:.3}-{:.3})",
                metric.name(),
                summary.mean,
                confidence_level * 100.0,
                summary.ci_lower,
                summary.ci_upper
            );
            summary
        });

        let result = ModeBootstrap {
            mode,
            n_iterations,
            confidence_level,
            n_patients: prepared.len(),
            metrics,
        };
        log::info!("Bootstrap finished: mode={mode}");
        match mode {
            Mode::Assisted => self.assisted = Some(result.clone()),
            Mode::Unaided => self.unaided = Some(result.clone()),
        }
        result
    }

    /// Paired per-iteration differences (assisted - unaided) of the stored results.
    pub fn delta(&self) -> Result<MetricSet<DeltaSummary>, BootstrapError> {
        let (assisted, unaided) = self.both_modes("delta")?;
        Ok(internal::paired_delta(assisted, unaided, self.settings.confidence_level))
    }

    /// Bootstraps the assisted records, then the unaided records, then pairs them.
    pub fn run_comparison(
        &mut self,
        assisted: &[ClassificationRecord],
        unaided: &[ClassificationRecord],
    ) -> BootstrapComparison {
        log::info!("Bootstrap comparison: assisted vs unaided");
        let assisted = self.run_bootstrap(assisted, Mode::Assisted);
        let unaided = self.run_bootstrap(unaided, Mode::Unaided);
        let delta = internal::paired_delta(&assisted, &unaided, self.settings.confidence_level);

        for (metric, d) in delta.iter() {
            log::info!(
                "  delta {}: {:+.3} (CI: {:+.3} to {:+.3}), p~{:.3}{}",
                metric.name(),
                d.summary.mean,
                d.summary.ci_lower,
                d.summary.ci_upper,
                d.p_value_approx,
                if d.significant { " [significant]" } else { "" }
            );
        }

        BootstrapComparison {
            n_iterations: self.settings.n_iterations,
            confidence_level: self.settings.confidence_level,
            seed: self.settings.seed,
            assisted,
            unaided,
            delta,
        }
    }

    /// Unaided rows, assisted rows, then delta rows, metrics in canonical order.
    pub fn summary_table(&self) -> Result<Vec<SummaryRow>, BootstrapError> {
        let (assisted, unaided) = self.both_modes("summary table")?;
        let delta = internal::paired_delta(assisted, unaided, self.settings.confidence_level);

        let mut rows = Vec::with_capacity(3 * RateMetric::ALL.len());
        rows.extend(unaided.metrics.iter().map(|(m, s)| SummaryRow::new("Unaided", m, s)));
        rows.extend(assisted.metrics.iter().map(|(m, s)| SummaryRow::new("Assisted", m, s)));
        rows.extend(delta.iter().map(|(m, d)| SummaryRow::new("Delta (A-U)", m, &d.summary)));
        Ok(rows)
    }

    fn both_modes(
        &self,
        requested: &str,
    ) -> Result<(&ModeBootstrap, &ModeBootstrap), BootstrapError> {
        let missing = |mode: Mode| BootstrapError::PrecursorMissing {
            requested: requested.to_string(),
            missing: mode.to_string(),
        };
        let assisted = self.assisted.as_ref().ok_or_else(|| missing(Mode::Assisted))?;
        let unaided = self.unaided.as_ref().ok_or_else(|| missing(Mode::Unaided))?;
        Ok((assisted, unaided))
    }
}

mod internal {
    use super::*;

    /// Per-patient labels reduced once, so each iteration only draws indices.
    pub(super) struct PreparedClusters {
        labels: Vec<(bool, bool)>,
    }

    impl PreparedClusters {
        pub(super) fn new(records: &[ClassificationRecord], policy: ReductionPolicy) -> Self {
            let labels = aggregate_to_patient_level(records, policy)
                .into_iter()
                .map(|p| (p.ground_truth, p.prediction))
                .collect();
            Self { labels }
        }

        pub(super) fn len(&self) -> usize {
            self.labels.len()
        }

        /// One iteration. Takes exactly `len()` draws from `rng`, matching
        /// `BootstrapAnalyzer::resample_patients`; repeated draws of a patient count once.
        pub(super) fn draw(
            &self,
            rng: &mut Xoshiro256PlusPlus,
            drawn: &mut [bool],
        ) -> MetricSet<f64> {
            let p = self.labels.len();
            drawn.iter_mut().for_each(|d| *d = false);
            for _ in 0..p {
                drawn[rng.gen_range(0..p)] = true;
            }
            let cm = ConfusionMatrix::from_labels(
                self.labels
                    .iter()
                    .zip(drawn.iter())
                    .filter(|(_, d)| **d)
                    .map(|(l, _)| *l),
            );
            rate_metrics(&cm)
        }
    }

    pub(super) fn paired_delta(
        assisted: &ModeBootstrap,
        unaided: &ModeBootstrap,
        confidence_level: f64,
    ) -> MetricSet<DeltaSummary> {
        MetricSet::from_fn(|metric| {
            let a = &assisted.metrics.get(metric).raw_samples;
            let u = &unaided.metrics.get(metric).raw_samples;
            let samples = a.iter().zip(u.iter()).map(|(x, y)| x - y).collect();
            DeltaSummary::from_samples(samples, confidence_level)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(n_iterations: usize, seed: u64) -> BootstrapSettings {
        BootstrapSettings {
            n_iterations,
            confidence_level: 0.95,
            seed,
        }
    }

    fn records(rows: &[(&str, bool, bool)]) -> Vec<ClassificationRecord> {
        rows.iter()
            .map(|&(id, gt, pred)| ClassificationRecord::new(id, gt, pred))
            .collect()
    }

    #[test]
    fn single_patient_resample_returns_all_of_its_records() {
        let data = records(&[("P1", true, true), ("P1", false, true), ("P1", true, false)]);
        let mut engine = BootstrapAnalyzer::new(settings(1, 42), ReductionPolicy::Max);
        let resampled = engine.resample_patients(&data);
        assert_eq!(resampled, data);
    }

    #[test]
    fn resample_length_varies_with_cluster_sizes() {
        let data = records(&[("P1", true, true), ("P1", true, false), ("P2", false, false)]);
        let mut engine = BootstrapAnalyzer::new(settings(1, 3), ReductionPolicy::Max);
        for _ in 0..20 {
            let n = engine.resample_patients(&data).len();
            assert!((2..=4).contains(&n));
        }
    }

    #[test]
    fn fast_path_consumes_the_same_stream_as_explicit_resampling() {
        let data = records(&[
            ("P1", true, true),
            ("P2", false, false),
            ("P2", false, true),
            ("P3", true, false),
            ("P4", false, false),
            ("P5", true, true),
        ]);
        let mut explicit = BootstrapAnalyzer::new(settings(25, 9), ReductionPolicy::Max);
        let expected: Vec<f64> = (0..25)
            .map(|_| explicit.single_iteration(&data).sensitivity)
            .collect();

        let mut engine = BootstrapAnalyzer::new(settings(25, 9), ReductionPolicy::Max);
        let result = engine.run_bootstrap(&data, Mode::Assisted);
        assert_eq!(result.metrics.sensitivity.raw_samples, expected);
    }

    #[test]
    fn empty_input_yields_zero_metrics() {
        let mut engine = BootstrapAnalyzer::new(settings(10, 42), ReductionPolicy::Max);
        let result = engine.run_bootstrap(&[], Mode::Unaided);
        assert_eq!(result.n_patients, 0);
        for (_, s) in result.metrics.iter() {
            assert_eq!(s.raw_samples.len(), 10);
            assert_eq!(s.mean, 0.0);
            assert_eq!(s.std, 0.0);
            assert_eq!((s.ci_lower, s.ci_upper), (0.0, 0.0));
        }
    }

    #[test]
    fn delta_before_both_modes_is_precursor_missing() {
        let data = records(&[("P1", true, true), ("P2", false, false)]);
        let mut engine = BootstrapAnalyzer::new(settings(5, 42), ReductionPolicy::Max);
        assert!(matches!(engine.delta(), Err(BootstrapError::PrecursorMissing { .. })));
        engine.run_bootstrap(&data, Mode::Assisted);
        match engine.summary_table() {
            Err(BootstrapError::PrecursorMissing { missing, .. }) => assert_eq!(missing, "unaided"),
            other => panic!("expected PrecursorMissing, got {other:?}"),
        }
        engine.run_bootstrap(&data, Mode::Unaided);
        assert!(engine.delta().is_ok());
    }

    #[test]
    fn summary_table_orders_unaided_assisted_delta() {
        let data = records(&[("P1", true, true), ("P2", false, false), ("P3", true, false)]);
        let mut engine = BootstrapAnalyzer::new(settings(50, 42), ReductionPolicy::Max);
        engine.run_comparison(&data, &data);
        let rows = engine.summary_table().unwrap();
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0].mode, "Unaided");
        assert_eq!(rows[0].metric, "SENSITIVITY");
        assert_eq!(rows[4].mode, "Assisted");
        assert_eq!(rows[8].mode, "Delta (A-U)");
        assert_eq!(rows[11].metric, "NPV");
    }

    #[test]
    fn p_value_counts_samples_opposite_the_mean() {
        let d = DeltaSummary::from_samples(vec![0.2, 0.1, -0.1, 0.3], 0.95);
        assert_eq!(d.p_value_approx, 0.25);

        let d = DeltaSummary::from_samples(vec![-0.2, 0.0, -0.1, -0.3], 0.95);
        assert_eq!(d.p_value_approx, 0.25);
        assert!(d.significant);

        let zero = DeltaSummary::from_samples(vec![0.0, 0.0], 0.95);
        assert_eq!(zero.p_value_approx, 1.0);
        assert!(!zero.significant);

        let all_up = DeltaSummary::from_samples(vec![0.1, 0.2, 0.3], 0.95);
        assert!(all_up.significant);
        assert_eq!(all_up.p_value_approx, 0.0);
    }

    #[test]
    fn strip_raw_samples_keeps_summaries() {
        let data = records(&[("P1", true, true), ("P2", false, false)]);
        let mut engine = BootstrapAnalyzer::new(settings(20, 42), ReductionPolicy::Max);
        let mut cmp = engine.run_comparison(&data, &data);
        let mean_before = cmp.assisted.metrics.sensitivity.mean;
        cmp.strip_raw_samples();
        assert!(cmp.assisted.metrics.sensitivity.raw_samples.is_empty());
        assert!(cmp.delta.npv.summary.raw_samples.is_empty());
        assert_eq!(cmp.assisted.metrics.sensitivity.mean, mean_before);
    }
}

//! Decision curve analysis.
//!
//! Net benefit weighs true positives against false positives at the odds implied by
//! a threshold probability `t`:
//!
//! ```text
//! NB(t) = TP/N - FP/N * t/(1-t)
//! ```
//!
//! Curves are evaluated on one evenly spaced grid shared by every strategy, so the
//! assisted-minus-unaided delta is taken pointwise. The harm-to-benefit ratio is
//! taken as 0 for `t >= 1`, which keeps every value finite whatever grid is supplied.

use crate::config::DcaSettings;
use crate::types::ConfusionMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Thresholds reported in the summary table (nearest grid point is used).
pub const KEY_THRESHOLDS: [f64; 5] = [0.05, 0.10, 0.15, 0.20, 0.25];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DcaError {
    #[error("Cannot compute {0}: compare_strategies has not been run yet.")]
    PrecursorMissing(String),
    #[error("Invalid threshold grid: {0}")]
    InvalidGrid(String),
}

/// `t / (1 - t)`, or 0 when `t >= 1`.
pub fn harm_benefit_ratio(threshold: f64) -> f64 {
    if threshold < 1.0 {
        threshold / (1.0 - threshold)
    } else {
        0.0
    }
}

/// Net benefit of acting on the classifier's positives. An empty table gives 0.
pub fn net_benefit(cm: &ConfusionMatrix, threshold: f64) -> f64 {
    let n = cm.total();
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    cm.true_positive as f64 / n - (cm.false_positive as f64 / n) * harm_benefit_ratio(threshold)
}

/// Net benefit of treating everyone.
pub fn treat_all_net_benefit(prevalence: f64, threshold: f64) -> f64 {
    prevalence - (1.0 - prevalence) * harm_benefit_ratio(threshold)
}

/// `n` evenly spaced values from `min` to `max` inclusive.
pub fn linspace(min: f64, max: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let step = (max - min) / (n - 1) as f64;
            (0..n).map(|i| min + step * i as f64).collect()
        }
    }
}

/// Decision curve of one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaCurve {
    pub strategy_name: String,
    pub confusion_matrix: ConfusionMatrix,
    pub prevalence: f64,
    pub n: u64,
    pub thresholds: Vec<f64>,
    pub net_benefit_model: Vec<f64>,
    pub net_benefit_treat_all: Vec<f64>,
    pub net_benefit_treat_none: Vec<f64>,
}

impl DcaCurve {
    /// Highest model net benefit and its threshold (first on ties).
    pub fn best(&self) -> Option<(f64, f64)> {
        self.net_benefit_model
            .iter()
            .zip(&self.thresholds)
            .fold(None, |acc: Option<(f64, f64)>, (&nb, &t)| match acc {
                Some((best, _)) if best >= nb => acc,
                _ => Some((nb, t)),
            })
    }
}

/// Where and how much the assisted curve beats the unaided one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaSummary {
    /// Signed delta with the largest magnitude.
    pub max_delta: f64,
    pub max_delta_threshold: f64,
    pub assisted_better_count: usize,
    pub assisted_better_fraction: f64,
    /// First and last grid thresholds where the delta is strictly positive.
    pub assisted_better_range: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaComparison {
    pub thresholds: Vec<f64>,
    pub assisted: DcaCurve,
    pub unaided: DcaCurve,
    pub delta_net_benefit: Vec<f64>,
    pub summary: DcaSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaSummaryRow {
    pub threshold: f64,
    pub nb_assisted: f64,
    pub nb_unaided: f64,
    pub nb_treat_all: f64,
    pub nb_treat_none: f64,
    pub delta_nb: f64,
    pub better_strategy: String,
}

pub struct DecisionCurveAnalyzer {
    thresholds: Vec<f64>,
    comparison: Option<DcaComparison>,
}

impl DecisionCurveAnalyzer {
    pub fn new(settings: DcaSettings) -> Result<Self, DcaError> {
        let DcaSettings {
            threshold_min,
            threshold_max,
            n_thresholds,
        } = settings;
        if n_thresholds == 0 {
            return Err(DcaError::InvalidGrid("n_thresholds must be at least 1".into()));
        }
        if !threshold_min.is_finite()
            || !threshold_max.is_finite()
            || threshold_min > threshold_max
        {
            return Err(DcaError::InvalidGrid(format!(
                "[{threshold_min}, {threshold_max}] is not an ordered finite range"
            )));
        }
        if threshold_max >= 1.0 {
            log::warn!(
                "Threshold grid reaches {threshold_max}; \
                 harm-to-benefit ratio is taken as 0 for t >= 1."
            );
        }
        log::info!(
            "DCA analyzer: threshold range=[{}, {}], n={}",
            threshold_min,
            threshold_max,
            n_thresholds
        );
        Ok(Self {
            thresholds: linspace(threshold_min, threshold_max, n_thresholds),
            comparison: None,
        })
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    /// Model, treat-all and treat-none curves for one confusion table.
    pub fn analyze_strategy(&self, cm: &ConfusionMatrix, strategy_name: &str) -> DcaCurve {
        let prevalence = cm.prevalence();
        let curve = DcaCurve {
            strategy_name: strategy_name.to_string(),
            confusion_matrix: *cm,
            prevalence,
            n: cm.total(),
            thresholds: self.thresholds.clone(),
            net_benefit_model: self.thresholds.iter().map(|&t| net_benefit(cm, t)).collect(),
            net_benefit_treat_all: self
                .thresholds
                .iter()
                .map(|&t| treat_all_net_benefit(prevalence, t))
                .collect(),
            net_benefit_treat_none: vec![0.0; self.thresholds.len()],
        };

        log::info!("[{}] decision curve:", strategy_name);
        log::info!("  Prevalence: {:.3}", prevalence);
        log::info!("  N: {}", curve.n);
        if let Some((nb, t)) = curve.best() {
            log::info!("  Max net benefit (model): {:.4} at threshold={:.3}", nb, t);
        }
        curve
    }

    /// Curves for both strategies on the shared grid and their pointwise difference.
    pub fn compare_strategies(
        &mut self,
        cm_assisted: &ConfusionMatrix,
        cm_unaided: &ConfusionMatrix,
    ) -> DcaComparison {
        log::info!("Decision curve analysis: assisted vs unaided");
        let assisted = self.analyze_strategy(cm_assisted, "AI-Assisted");
        let unaided = self.analyze_strategy(cm_unaided, "Unaided");

        let delta_net_benefit: Vec<f64> = assisted
            .net_benefit_model
            .iter()
            .zip(&unaided.net_benefit_model)
            .map(|(a, u)| a - u)
            .collect();
        let summary = internal::summarize(&self.thresholds, &delta_net_benefit);

        log::info!(
            "  Max delta net benefit: {:+.4} at threshold={:.3}",
            summary.max_delta,
            summary.max_delta_threshold
        );
        match summary.assisted_better_range {
            Some((lo, hi)) => log::info!(
                "  Assisted is better at threshold range [{:.3}, {:.3}] ({}/{} thresholds, {:.1}%)",
                lo,
                hi,
                summary.assisted_better_count,
                self.thresholds.len(),
                summary.assisted_better_fraction * 100.0
            ),
            None => log::info!("  Assisted is not better at any threshold in the analyzed range."),
        }

        let comparison = DcaComparison {
            thresholds: self.thresholds.clone(),
            assisted,
            unaided,
            delta_net_benefit,
            summary,
        };
        self.comparison = Some(comparison.clone());
        comparison
    }

    /// Net benefits at the key thresholds 0.05 to 0.25, nearest grid point each.
    pub fn summary_table(&self) -> Result<Vec<DcaSummaryRow>, DcaError> {
        let cmp = self
            .comparison
            .as_ref()
            .ok_or_else(|| DcaError::PrecursorMissing("the DCA summary table".into()))?;

        Ok(KEY_THRESHOLDS
            .iter()
            .filter_map(|&target| internal::nearest_index(&cmp.thresholds, target))
            .map(|idx| {
                let delta = cmp.delta_net_benefit[idx];
                let better = if delta > 0.0 {
                    "Assisted"
                } else if delta < 0.0 {
                    "Unaided"
                } else {
                    "Equal"
                };
                DcaSummaryRow {
                    threshold: cmp.thresholds[idx],
                    nb_assisted: cmp.assisted.net_benefit_model[idx],
                    nb_unaided: cmp.unaided.net_benefit_model[idx],
                    nb_treat_all: cmp.assisted.net_benefit_treat_all[idx],
                    nb_treat_none: 0.0,
                    delta_nb: delta,
                    better_strategy: better.to_string(),
                }
            })
            .collect())
    }
}

mod internal {
    use super::*;

    /// Index of the grid value closest to `target`, first on ties.
    pub(super) fn nearest_index(grid: &[f64], target: f64) -> Option<usize> {
        grid.iter()
            .enumerate()
            .fold(None, |acc: Option<(usize, f64)>, (i, &t)| {
                let d = (t - target).abs();
                match acc {
                    Some((_, best)) if best <= d => acc,
                    _ => Some((i, d)),
                }
            })
            .map(|(i, _)| i)
    }

    pub(super) fn summarize(thresholds: &[f64], delta: &[f64]) -> DcaSummary {
        let (max_idx, max_delta) = delta
            .iter()
            .enumerate()
            .fold((0, 0.0_f64), |(bi, bd), (i, &d)| {
                if d.abs() > bd.abs() { (i, d) } else { (bi, bd) }
            });

        let better: Vec<usize> = (0..delta.len()).filter(|&i| delta[i] > 0.0).collect();
        let assisted_better_range = match (better.first(), better.last()) {
            (Some(&lo), Some(&hi)) => Some((thresholds[lo], thresholds[hi])),
            _ => None,
        };
        let assisted_better_fraction = if delta.is_empty() {
            0.0
        } else {
            better.len() as f64 / delta.len() as f64
        };

        DcaSummary {
            max_delta,
            max_delta_threshold: thresholds.get(max_idx).copied().unwrap_or(0.0),
            assisted_better_count: better.len(),
            assisted_better_fraction,
            assisted_better_range,
        }
    }
}

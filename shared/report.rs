//! Markdown reports and flat CSV rows for every engine.

use crate::bootstrap::{BootstrapComparison, SummaryRow};
use crate::dca::{DcaComparison, DcaSummaryRow};
use crate::gee::model::{GeeFit, significance_marker};
use crate::metrics::{LesionComparison, LesionMetrics};
use crate::pipeline::StudyAnalysis;
use crate::types::RateMetric;
use serde::Serialize;
use std::fmt::{self, Write};

/// One strategy (or the delta) of the lesion-level table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LesionRow {
    pub strategy: String,
    #[serde(rename = "TP")]
    pub true_positive: Option<u64>,
    #[serde(rename = "FP")]
    pub false_positive: Option<u64>,
    #[serde(rename = "FN")]
    pub false_negative: Option<u64>,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

impl LesionRow {
    fn from_metrics(strategy: &str, m: &LesionMetrics) -> Self {
        Self {
            strategy: strategy.to_string(),
            true_positive: Some(m.confusion_matrix.true_positive),
            false_positive: Some(m.confusion_matrix.false_positive),
            false_negative: Some(m.confusion_matrix.false_negative),
            precision: m.precision,
            recall: m.recall,
            f1_score: m.f1_score,
        }
    }
}

pub fn lesion_rows(cmp: &LesionComparison) -> Vec<LesionRow> {
    vec![
        LesionRow::from_metrics("AI-Assisted", &cmp.assisted),
        LesionRow::from_metrics("Unaided", &cmp.unaided),
        LesionRow {
            strategy: "Delta (A-U)".to_string(),
            true_positive: None,
            false_positive: None,
            false_negative: None,
            precision: cmp.delta.precision,
            recall: cmp.delta.recall,
            f1_score: cmp.delta.f1_score,
        },
    ]
}

/// One grid point of the decision curves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DcaCurveRow {
    pub threshold: f64,
    pub nb_assisted: f64,
    pub nb_unaided: f64,
    pub nb_treat_all: f64,
    pub nb_treat_none: f64,
    pub delta_nb: f64,
}

pub fn dca_curve_rows(cmp: &DcaComparison) -> Vec<DcaCurveRow> {
    (0..cmp.thresholds.len())
        .map(|i| DcaCurveRow {
            threshold: cmp.thresholds[i],
            nb_assisted: cmp.assisted.net_benefit_model[i],
            nb_unaided: cmp.unaided.net_benefit_model[i],
            nb_treat_all: cmp.assisted.net_benefit_treat_all[i],
            nb_treat_none: cmp.assisted.net_benefit_treat_none[i],
            delta_nb: cmp.delta_net_benefit[i],
        })
        .collect()
}

pub fn bootstrap_report(
    reader: &str,
    cmp: &BootstrapComparison,
    rows: &[SummaryRow],
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "# Bootstrap Analysis: {reader}\n")?;
    writeln!(
        out,
        "- Iterations: {}\n- Confidence level: {:.0}%\n- Seed: {}\n- Resampling unit: patient\n",
        cmp.n_iterations,
        cmp.confidence_level * 100.0,
        cmp.seed
    )?;
    writeln!(out, "| Mode | Metric | Mean | SD | CI lower | CI upper |")?;
    writeln!(out, "|------|--------|------|----|----------|----------|")?;
    for r in rows {
        writeln!(
            out,
            "| {} | {} | {:.4} | {:.4} | {:.4} | {:.4} |",
            r.mode, r.metric, r.mean, r.std, r.ci_lower, r.ci_upper
        )?;
    }

    writeln!(out, "\n## Assisted - Unaided\n")?;
    for (metric, d) in cmp.delta.iter() {
        writeln!(
            out,
            "- **{}**: {:+.4} (CI {:+.4} to {:+.4}), p~{:.3}{}",
            metric.label(),
            d.summary.mean,
            d.summary.ci_lower,
            d.summary.ci_upper,
            d.p_value_approx,
            if d.significant { ", significant" } else { "" }
        )?;
    }
    writeln!(
        out,
        "\np~ is the share of paired bootstrap deltas on the other side of zero from the mean; \
         it is a one-sided approximation, not a calibrated test."
    )?;
    Ok(out)
}

pub fn gee_report(reader: &str, fit: &GeeFit) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "# GEE Analysis: {reader}\n")?;
    writeln!(out, "- **Family**: Binomial, Logit link")?;
    writeln!(
        out,
        "- **Working Correlation**: {}, alpha={:.3}",
        fit.correlation_structure, fit.correlation_alpha
    )?;
    writeln!(
        out,
        "- **Observations**: {}, **Clusters**: {}, **Mean cluster size**: {:.2}",
        fit.n_obs, fit.n_clusters, fit.mean_cluster_size
    )?;
    if !fit.converged {
        writeln!(
            out,
            "- **Warning**: the optimizer did not converge; estimates are the best point reached."
        )?;
    }
    if fit.used_pseudo_inverse {
        writeln!(
            out,
            "- **Warning**: the information matrix was singular; a pseudo-inverse was used."
        )?;
    }
    for c in fit.coefficients.iter().filter(|c| c.se_robust == 0.0) {
        writeln!(
            out,
            "- **Note**: {} has zero robust variance; its z and p carry no information.",
            c.name
        )?;
    }

    writeln!(out, "\n| Variable | Beta | Robust SE | z | p | OR | OR 95% CI |")?;
    writeln!(out, "|----------|------|-----------|---|---|----|-----------|")?;
    for c in &fit.coefficients {
        writeln!(
            out,
            "| {} | {:.4} | {:.4} | {:.3} | {:.4}{} | {:.3} | [{:.3}, {:.3}] |",
            c.name,
            c.beta,
            c.se_robust,
            c.z,
            c.p_value,
            c.significance_marker(),
            c.odds_ratio,
            c.or_ci_lower,
            c.or_ci_upper
        )?;
    }

    if let Some(mode) = fit.mode_effect() {
        writeln!(out, "\n## Interpretation\n")?;
        let direction = if mode.odds_ratio >= 1.0 { "higher" } else { "lower" };
        writeln!(
            out,
            "AI assistance is associated with {:.1}% {} odds of a correct classification \
             (OR {:.3}, p={:.4}).",
            mode.odds_percent_change().abs(),
            direction,
            mode.odds_ratio,
            mode.p_value
        )?;
    }
    writeln!(
        out,
        "\nStandard errors use the cluster-robust sandwich estimator around a logistic MLE; \
         β is not re-estimated under the working correlation."
    )?;
    Ok(out)
}

pub fn dca_report(
    reader: &str,
    cmp: &DcaComparison,
    rows: &[DcaSummaryRow],
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "# Decision Curve Analysis: {reader}\n")?;
    writeln!(out, "Net Benefit = TP/N - FP/N x (t / (1 - t))\n")?;
    for curve in [&cmp.assisted, &cmp.unaided] {
        writeln!(
            out,
            "- **{}**: N={}, prevalence={:.3}",
            curve.strategy_name, curve.n, curve.prevalence
        )?;
    }

    writeln!(
        out,
        "\n| Threshold | NB Assisted | NB Unaided | NB Treat All \
         | NB Treat None | Delta NB | Better |"
    )?;
    writeln!(
        out,
        "|-----------|-------------|------------|--------------\
         |---------------|----------|--------|"
    )?;
    for r in rows {
        writeln!(
            out,
            "| {:.2} | {:.4} | {:.4} | {:.4} | {:.4} | {:+.4} | {} |",
            r.threshold,
            r.nb_assisted,
            r.nb_unaided,
            r.nb_treat_all,
            r.nb_treat_none,
            r.delta_nb,
            r.better_strategy
        )?;
    }

    let s = &cmp.summary;
    writeln!(out, "\n## Summary\n")?;
    writeln!(
        out,
        "- Largest difference: {:+.4} at threshold {:.3}",
        s.max_delta, s.max_delta_threshold
    )?;
    match s.assisted_better_range {
        Some((lo, hi)) => writeln!(
            out,
            "- Assisted is better on [{:.3}, {:.3}] ({}/{} thresholds, {:.1}%)",
            lo,
            hi,
            s.assisted_better_count,
            cmp.thresholds.len(),
            s.assisted_better_fraction * 100.0
        )?,
        None => writeln!(out, "- Assisted is not better at any analyzed threshold")?,
    }
    Ok(out)
}

pub fn lesion_report(reader: &str, cmp: &LesionComparison) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "# Lesion-Level Detection Metrics: {reader}\n")?;
    writeln!(out, "| Strategy | TP | FP | FN | Precision | Recall | F1 Score |")?;
    writeln!(out, "|----------|----|----|----|-----------|--------|----------|")?;
    for row in lesion_rows(cmp) {
        let count = |c: Option<u64>| c.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "| {} | {} | {} | {} | {:.4} | {:.4} | {:.4} |",
            row.strategy,
            count(row.true_positive),
            count(row.false_positive),
            count(row.false_negative),
            row.precision,
            row.recall,
            row.f1_score
        )?;
    }
    writeln!(out, "\n{}", cmp.trade_off.describe())?;
    Ok(out)
}

/// Study-wide Markdown summary across all readers.
pub fn study_summary(study: &StudyAnalysis) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "# Reader Study Summary\n")?;
    writeln!(out, "Readers analyzed: {}\n", study.readers.len())?;

    writeln!(out, "## Patient-Level Metrics\n")?;
    writeln!(out, "| Reader | Metric | Unaided | Assisted | Delta |")?;
    writeln!(out, "|--------|--------|---------|----------|-------|")?;
    for r in &study.readers {
        for metric in RateMetric::ALL {
            writeln!(
                out,
                "| {} | {} | {:.4} | {:.4} | {:+.4} |",
                r.reader,
                metric.label(),
                r.patient.unaided.metrics.get(metric),
                r.patient.assisted.metrics.get(metric),
                r.patient.delta.get(metric)
            )?;
        }
    }

    writeln!(out, "\n## Bootstrap Delta (Assisted - Unaided)\n")?;
    writeln!(out, "| Reader | Metric | Mean | 95% CI | p~ |")?;
    writeln!(out, "|--------|--------|------|--------|----|")?;
    for r in &study.readers {
        for (metric, d) in r.bootstrap.delta.iter() {
            writeln!(
                out,
                "| {} | {} | {:+.4} | [{:+.4}, {:+.4}] | {:.3}{} |",
                r.reader,
                metric.label(),
                d.summary.mean,
                d.summary.ci_lower,
                d.summary.ci_upper,
                d.p_value_approx,
                if d.significant { " *" } else { "" }
            )?;
        }
    }

    writeln!(out, "\n## GEE Mode Effect\n")?;
    writeln!(out, "| Reader | OR | 95% CI | p | alpha |")?;
    writeln!(out, "|--------|----|--------|---|-------|")?;
    let gee_rows = study
        .readers
        .iter()
        .map(|r| (r.reader.as_str(), r.gee.as_ref()))
        .chain(study.pooled_gee.as_ref().map(|fit| ("Pooled", Some(fit))));
    for (name, fit) in gee_rows {
        write_gee_row(&mut out, name, fit)?;
    }

    writeln!(out, "\n## Decision Curves\n")?;
    writeln!(out, "| Reader | Max Delta NB | At threshold | Assisted better |")?;
    writeln!(out, "|--------|--------------|--------------|-----------------|")?;
    for r in &study.readers {
        let s = &r.dca.summary;
        writeln!(
            out,
            "| {} | {:+.4} | {:.3} | {:.1}% |",
            r.reader,
            s.max_delta,
            s.max_delta_threshold,
            s.assisted_better_fraction * 100.0
        )?;
    }

    writeln!(out, "\n## Lesion-Level Detection\n")?;
    writeln!(out, "| Reader | Delta Precision | Delta Recall | Delta F1 | Pattern |")?;
    writeln!(out, "|--------|-----------------|--------------|----------|---------|")?;
    for r in &study.readers {
        writeln!(
            out,
            "| {} | {:+.4} | {:+.4} | {:+.4} | {:?} |",
            r.reader,
            r.lesion.delta.precision,
            r.lesion.delta.recall,
            r.lesion.delta.f1_score,
            r.lesion.trade_off
        )?;
    }

    writeln!(out, "\nSignificance: *** p<0.001, ** p<0.01, * p<0.05")?;
    Ok(out)
}

fn write_gee_row(out: &mut String, name: &str, fit: Option<&GeeFit>) -> fmt::Result {
    match fit.and_then(|f| f.mode_effect().map(|c| (f, c))) {
        Some((f, c)) => writeln!(
            out,
            "| {} | {:.3} | [{:.3}, {:.3}] | {:.4}{} | {:.3} |",
            name,
            c.odds_ratio,
            c.or_ci_lower,
            c.or_ci_upper,
            c.p_value,
            significance_marker(c.p_value),
            f.correlation_alpha
        ),
        None => writeln!(out, "| {name} | - | - | - | - |"),
    }
}

/// Reader directory name with path separators and other unsafe characters replaced.
pub fn reader_dir_name(reader: &str) -> String {
    let cleaned: String = reader
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "reader".to_string(),
        s => s.to_string(),
    }
}

/// Per-reader artifact file names, as written by the pipeline.
pub const READER_ARTIFACTS: &[&str] = &[
    "patient_metrics.json",
    "lesion_metrics.json",
    "lesion_metrics.csv",
    "lesion_report.md",
    "bootstrap_results.json",
    "bootstrap_summary.csv",
    "bootstrap_report.md",
    "gee_results.json",
    "gee_coefficients.csv",
    "gee_report.md",
    "dca_results.json",
    "dca_curve.csv",
    "dca_summary.csv",
    "dca_report.md",
];

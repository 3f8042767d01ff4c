use crate::config::GeeSettings;
use crate::gee::design::{GeeDesign, GeeObservation, MODE_COVARIATE};
use crate::gee::estimate::{EstimationError, fit_logistic, fitted_probabilities};
use crate::gee::sandwich::{exchangeable_alpha, robust_covariance};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;

/// Two-sided 95% normal quantile used for Wald intervals.
pub const Z_95: f64 = 1.96;

/// Wald inference for one coefficient, on the log-odds and odds-ratio scales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientSummary {
    pub name: String,
    pub beta: f64,
    pub se_robust: f64,
    pub z: f64,
    pub p_value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    #[serde(rename = "OR")]
    pub odds_ratio: f64,
    #[serde(rename = "OR_ci_lower")]
    pub or_ci_lower: f64,
    #[serde(rename = "OR_ci_upper")]
    pub or_ci_upper: f64,
}

impl CoefficientSummary {
    /// A zero standard error carries no information about `beta`: z is 0 and p is 1.
    pub fn new(name: &str, beta: f64, se_robust: f64) -> Self {
        let z = if se_robust > 0.0 { beta / se_robust } else { 0.0 };
        let ci_lower = beta - Z_95 * se_robust;
        let ci_upper = beta + Z_95 * se_robust;
        Self {
            name: name.to_string(),
            beta,
            se_robust,
            z,
            p_value: two_sided_p_value(z),
            ci_lower,
            ci_upper,
            odds_ratio: beta.exp(),
            or_ci_lower: ci_lower.exp(),
            or_ci_upper: ci_upper.exp(),
        }
    }

    /// Change in odds implied by the odds ratio, in percent.
    pub fn odds_percent_change(&self) -> f64 {
        (self.odds_ratio - 1.0) * 100.0
    }

    /// `***` below 0.001, `**` below 0.01, `*` below 0.05.
    pub fn significance_marker(&self) -> &'static str {
        significance_marker(self.p_value)
    }
}

pub fn significance_marker(p_value: f64) -> &'static str {
    if p_value < 0.001 {
        "***"
    } else if p_value < 0.01 {
        "**"
    } else if p_value < 0.05 {
        "*"
    } else {
        ""
    }
}

/// Standard normal CDF.
pub fn standard_normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// `2 (1 - Φ(|z|))`.
pub fn two_sided_p_value(z: f64) -> f64 {
    2.0 * (1.0 - standard_normal_cdf(z.abs()))
}

/// A completed clustered logistic fit. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeeFit {
    pub coefficients: Vec<CoefficientSummary>,
    pub correlation_structure: String,
    pub correlation_alpha: f64,
    pub n_obs: usize,
    pub n_clusters: usize,
    pub mean_cluster_size: f64,
    pub n_covariates: usize,
    pub converged: bool,
    pub iterations: Option<usize>,
    pub log_likelihood: f64,
    pub used_pseudo_inverse: bool,
    pub robust_covariance: Array2<f64>,
}

impl GeeFit {
    pub fn get(&self, name: &str) -> Option<&CoefficientSummary> {
        self.coefficients.iter().find(|c| c.name == name)
    }

    /// The assistance-mode coefficient.
    pub fn mode_effect(&self) -> Option<&CoefficientSummary> {
        self.get(MODE_COVARIATE)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GeeAnalyzer {
    settings: GeeSettings,
}

impl GeeAnalyzer {
    pub fn new(settings: GeeSettings) -> Self {
        Self { settings }
    }

    /// Builds the design from `observations` and fits it.
    pub fn fit(
        &self,
        observations: &[GeeObservation],
        include_reader: bool,
    ) -> Result<GeeFit, EstimationError> {
        log::info!("GEE analysis started ({} observations)", observations.len());
        let design = GeeDesign::build(observations, include_reader)?;
        Ok(self.fit_design(&design))
    }

    /// Logistic MLE, exchangeable α, sandwich covariance, Wald inference.
    pub fn fit_design(&self, design: &GeeDesign) -> GeeFit {
        log::info!("[Step 1] Logistic regression point estimate");
        let logistic = fit_logistic(design, self.settings.max_iter, self.settings.tolerance);
        let mu = fitted_probabilities(design.x.view(), logistic.beta.view());

        log::info!("[Step 2] Working correlation");
        let residuals = &design.y - &mu;
        let alpha = exchangeable_alpha(design, residuals.view());

        log::info!("[Step 3] Robust standard errors");
        let sandwich = robust_covariance(design, mu.view());
        let se = sandwich.standard_errors();

        let coefficients: Vec<CoefficientSummary> = design
            .covariate_names
            .iter()
            .enumerate()
            .map(|(j, name)| CoefficientSummary::new(name, logistic.beta[j], se[j]))
            .collect();

        let fit = GeeFit {
            coefficients,
            correlation_structure: "exchangeable".to_string(),
            correlation_alpha: alpha,
            n_obs: design.n_obs(),
            n_clusters: design.n_clusters(),
            mean_cluster_size: design.mean_cluster_size(),
            n_covariates: design.n_covariates(),
            converged: logistic.converged,
            iterations: logistic.iterations,
            log_likelihood: logistic.log_likelihood,
            used_pseudo_inverse: sandwich.used_pseudo_inverse,
            robust_covariance: sandwich.covariance,
        };
        log_coefficients(&fit);
        fit
    }
}

fn log_coefficients(fit: &GeeFit) {
    log::info!("Model: Binomial family, Logit link, Exchangeable correlation");
    log::info!(
        "N observations: {}, N clusters: {}, alpha={:.3}",
        fit.n_obs,
        fit.n_clusters,
        fit.correlation_alpha
    );
    log::info!(
        "{:<30} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "Variable",
        "Beta",
        "SE",
        "z",
        "P>|z|",
        "OR"
    );
    for c in &fit.coefficients {
        log::info!(
            "{:<30} {:>10.4} {:>10.4} {:>10.3} {:>10.4} {:>10.3} {}",
            c.name,
            c.beta,
            c.se_robust,
            c.z,
            c.p_value,
            c.odds_ratio,
            c.significance_marker()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn normal_tail_probabilities() {
        assert_abs_diff_eq!(standard_normal_cdf(0.0), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(two_sided_p_value(1.96), 0.05, epsilon = 1e-3);
        assert_abs_diff_eq!(two_sided_p_value(-1.96), 0.05, epsilon = 1e-3);
        assert!(two_sided_p_value(f64::INFINITY) < 1e-12);
        assert_abs_diff_eq!(two_sided_p_value(0.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn coefficient_summary_exponentiates_interval() {
        let c = CoefficientSummary::new("Mode (Assisted vs Unaided)", 0.5, 0.25);
        assert_abs_diff_eq!(c.z, 2.0);
        assert_abs_diff_eq!(c.ci_lower, 0.5 - 0.49);
        assert_abs_diff_eq!(c.or_ci_upper, (0.5_f64 + 0.49).exp());
        assert_abs_diff_eq!(c.odds_percent_change(), (0.5_f64.exp() - 1.0) * 100.0);
        assert_eq!(c.significance_marker(), "*");
    }

    #[test]
    fn zero_standard_error_is_not_significant() {
        let flat = CoefficientSummary::new("Intercept", 0.0, 0.0);
        assert_eq!(flat.z, 0.0);
        assert_eq!(flat.p_value, 1.0);
        let degenerate = CoefficientSummary::new("Mode (Assisted vs Unaided)", -9.9e-9, 0.0);
        assert_eq!(degenerate.z, 0.0);
        assert_eq!(degenerate.p_value, 1.0);
        assert_eq!(degenerate.significance_marker(), "");
    }

    #[test]
    fn coefficient_json_uses_odds_ratio_keys() {
        let c = CoefficientSummary::new("Intercept", 0.0, 1.0);
        let json = serde_json::to_value(&c).unwrap();
        assert!(json.get("OR").is_some());
        assert!(json.get("OR_ci_lower").is_some());
        assert!(json.get("se_robust").is_some());
    }
}

//! Working correlation and cluster-robust covariance.
//!
//! Given the fitted probabilities of the unclustered model, this module estimates the
//! exchangeable working correlation and the sandwich covariance `A⁻¹ B A⁻¹`, where
//! `A = XᵀWX` is the model-based information and `B` sums the outer products of the
//! per-cluster scores `Xᵢᵀrᵢ`.

use crate::gee::design::GeeDesign;
use crate::gee::estimate::MIN_WEIGHT;

use ndarray::{Array1, Array2, ArrayView1, Axis, s};
use ndarray_linalg::{Eigh, Inverse, UPLO, error::LinalgError};

/// α is clamped to this magnitude.
pub const ALPHA_BOUND: f64 = 0.99;
/// `sqrt(f64::EPSILON)`. Variances at or below this fraction of the covariance scale
/// are round-off.
pub const DEGENERATE_VARIANCE_RTOL: f64 = 1.490_116_119_384_765_6e-8;

/// Mean of `rᵢ rⱼ` over all within-cluster pairs `i < j`, clamped to ±0.99.
///
/// Clusters of size one contribute no pairs. With no pairs at all, α is 0.
pub fn exchangeable_alpha(design: &GeeDesign, residuals: ArrayView1<f64>) -> f64 {
    let mut sum = 0.0;
    let mut pairs = 0usize;
    for cluster in &design.clusters {
        let r = residuals.slice(s![cluster.clone()]);
        for i in 0..r.len() {
            for j in (i + 1)..r.len() {
                sum += r[i] * r[j];
                pairs += 1;
            }
        }
    }

    if pairs == 0 {
        log::info!("  Working correlation (exchangeable): no within-cluster pairs, alpha=0");
        return 0.0;
    }
    let alpha = (sum / pairs as f64).clamp(-ALPHA_BOUND, ALPHA_BOUND);
    log::info!("  Working correlation (exchangeable): alpha={:.3} from {} pairs", alpha, pairs);
    alpha
}

#[derive(Debug, Clone)]
pub struct SandwichCovariance {
    pub covariance: Array2<f64>,
    /// `A` could not be inverted and the pseudo-inverse was used.
    pub used_pseudo_inverse: bool,
}

impl SandwichCovariance {
    /// `sqrt(diag(V))`. A variance within round-off of zero, relative to
    /// `max(1, max diag(V))`, is reported as exactly zero.
    pub fn standard_errors(&self) -> Array1<f64> {
        let diag = self.covariance.diag();
        let scale = diag.iter().fold(1.0_f64, |m, &v| m.max(v.abs()));
        let floor = DEGENERATE_VARIANCE_RTOL * scale;
        diag.mapv(|v| if v > floor { v.sqrt() } else { 0.0 })
    }
}

/// Sandwich covariance of the coefficients at fitted probabilities `mu`.
pub fn robust_covariance(design: &GeeDesign, mu: ArrayView1<f64>) -> SandwichCovariance {
    let x = &design.x;
    let residuals = &design.y - &mu;
    let weights = mu.mapv(|m| (m * (1.0 - m)).max(MIN_WEIGHT));

    // A = XᵀWX
    let weighted_x = x * &weights.view().insert_axis(Axis(1));
    let bread = x.t().dot(&weighted_x);

    // B = Σ (Xᵢᵀrᵢ)(Xᵢᵀrᵢ)ᵀ
    let p = design.n_covariates();
    let mut meat = Array2::<f64>::zeros((p, p));
    for cluster in &design.clusters {
        let xi = x.slice(s![cluster.clone(), ..]);
        let ri = residuals.slice(s![cluster.clone()]);
        let score = xi.t().dot(&ri);
        let outer = score
            .view()
            .insert_axis(Axis(1))
            .dot(&score.view().insert_axis(Axis(0)));
        meat += &outer;
    }

    let (bread_inv, used_pseudo_inverse) = match bread.inv() {
        Ok(inv) if inv.iter().all(|v| v.is_finite()) => (inv, false),
        outcome => {
            let reason = match outcome {
                Err(e) => format!("{e}"),
                Ok(_) => "non-finite inverse".to_string(),
            };
            log::warn!(
                "Information matrix A is singular ({}); using the pseudo-inverse.",
                reason
            );
            let pinv = internal::pseudo_inverse(&bread).unwrap_or_else(|e| {
                log::warn!("Eigendecomposition of A failed ({e}); robust covariance set to zero.");
                Array2::zeros((p, p))
            });
            (pinv, true)
        }
    };

    SandwichCovariance {
        covariance: bread_inv.dot(&meat).dot(&bread_inv),
        used_pseudo_inverse,
    }
}

/// Internal module for linear-algebra helpers.
mod internal {
    use super::*;

    /// Moore-Penrose pseudo-inverse of a symmetric matrix via its eigendecomposition.
    /// Eigenvalues below a tolerance relative to the largest are treated as zero.
    pub(super) fn pseudo_inverse(a: &Array2<f64>) -> Result<Array2<f64>, LinalgError> {
        let (eigvals, eigvecs) = a.eigh(UPLO::Lower)?;
        let largest = eigvals.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
        let tol = largest * a.nrows() as f64 * f64::EPSILON;
        let mut d_plus = Array1::zeros(eigvals.len());
        for (i, &eig) in eigvals.iter().enumerate() {
            if eig.abs() > tol {
                d_plus[i] = 1.0 / eig;
            }
        }
        Ok(eigvecs.dot(&Array2::from_diag(&d_plus)).dot(&eigvecs.t()))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use approx::assert_abs_diff_eq;
        use ndarray::array;

        #[test]
        fn pseudo_inverse_of_rank_one_matrix() {
            let a = array![[2.0, 2.0], [2.0, 2.0]];
            let pinv = pseudo_inverse(&a).unwrap();
            // pinv(a) = a / 16
            for v in pinv.iter() {
                assert_abs_diff_eq!(*v, 0.125, epsilon = 1e-12);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn design(y: Array1<f64>, x: Array2<f64>, clusters: Vec<std::ops::Range<usize>>) -> GeeDesign {
        let names = (0..x.ncols()).map(|j| format!("x{j}")).collect();
        GeeDesign::from_parts(y, x, clusters, names).unwrap()
    }

    #[test]
    fn alpha_averages_within_cluster_products() {
        let d = design(
            array![1.0, 1.0, 0.0, 1.0],
            Array2::ones((4, 1)),
            vec![0..2, 2..3, 3..4],
        );
        let residuals = array![0.5, 0.2, -0.4, 0.3];
        // only cluster 0..2 has a pair
        assert_abs_diff_eq!(exchangeable_alpha(&d, residuals.view()), 0.1);

        let singletons = design(array![1.0, 0.0], Array2::ones((2, 1)), vec![0..1, 1..2]);
        assert_eq!(exchangeable_alpha(&singletons, array![0.5, -0.5].view()), 0.0);
    }

    #[test]
    fn alpha_is_clamped() {
        let d = design(array![1.0, 1.0], Array2::ones((2, 1)), vec![0..2]);
        assert_eq!(exchangeable_alpha(&d, array![2.0, 3.0].view()), ALPHA_BOUND);
    }

    #[test]
    fn singleton_clusters_give_heteroskedasticity_robust_variance() {
        // One covariate (intercept): V = Σ r² / (Σ w)²
        let d = design(array![1.0, 0.0, 1.0], Array2::ones((3, 1)), vec![0..1, 1..2, 2..3]);
        let mu = array![0.5, 0.5, 0.5];
        let v = robust_covariance(&d, mu.view());
        assert!(!v.used_pseudo_inverse);
        assert_abs_diff_eq!(v.covariance[[0, 0]], 0.75 / (0.75 * 0.75), epsilon = 1e-12);
    }

    #[test]
    fn singular_information_falls_back_to_pseudo_inverse() {
        // Intercept and mode columns are identical (every row assisted).
        let d = design(array![1.0, 0.0, 1.0, 1.0], Array2::ones((4, 2)), vec![0..2, 2..4]);
        let mu = array![0.7, 0.7, 0.7, 0.7];
        let v = robust_covariance(&d, mu.view());
        assert!(v.used_pseudo_inverse);
        assert!(v.covariance.iter().all(|c| c.is_finite()));
        assert!(v.standard_errors().iter().all(|se| se.is_finite() && *se >= 0.0));
    }

    #[test]
    fn round_off_variance_is_reported_as_zero() {
        let v = SandwichCovariance {
            covariance: array![[0.25, 1e-12], [1e-12, 3e-17]],
            used_pseudo_inverse: false,
        };
        let se = v.standard_errors();
        assert_abs_diff_eq!(se[0], 0.5);
        assert_eq!(se[1], 0.0);

        let negative = SandwichCovariance {
            covariance: array![[-1e-18]],
            used_pseudo_inverse: false,
        };
        assert_eq!(negative.standard_errors()[0], 0.0);
    }
}

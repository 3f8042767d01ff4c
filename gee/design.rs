use crate::gee::estimate::EstimationError;
use crate::types::{ClassificationRecord, Mode};
use ahash::AHashMap;
use itertools::Itertools;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::ops::Range;

pub const INTERCEPT: &str = "Intercept";
pub const MODE_COVARIATE: &str = "Mode (Assisted vs Unaided)";
pub const READER_COVARIATE: &str = "Reader ID";

/// One reading of one unit, ready for the GEE design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeeObservation {
    /// Grouping key for the robust variance (the patient).
    pub cluster_id: String,
    /// TP or TN.
    pub correct: bool,
    pub mode: Mode,
    pub reader_index: usize,
}

impl GeeObservation {
    /// Assisted records first, then unaided, each tagged with `reader_index`.
    pub fn from_paired_records(
        assisted: &[ClassificationRecord],
        unaided: &[ClassificationRecord],
        reader_index: usize,
    ) -> Vec<Self> {
        assisted
            .iter()
            .map(|r| (r, Mode::Assisted))
            .chain(unaided.iter().map(|r| (r, Mode::Unaided)))
            .map(|(r, mode)| GeeObservation {
                cluster_id: r.patient_id.clone(),
                correct: r.is_correct(),
                mode,
                reader_index,
            })
            .collect()
    }
}

/// Outcome vector, design matrix and cluster layout.
///
/// Rows are grouped so that every cluster occupies one contiguous range, clusters in
/// first-appearance order and rows within a cluster in input order.
#[derive(Debug, Clone)]
pub struct GeeDesign {
    pub y: Array1<f64>,
    pub x: Array2<f64>,
    pub clusters: Vec<Range<usize>>,
    pub covariate_names: Vec<String>,
}

impl GeeDesign {
    /// Columns: intercept, mode indicator (1 = assisted), and optionally the reader index.
    pub fn build(
        observations: &[GeeObservation],
        include_reader: bool,
    ) -> Result<Self, EstimationError> {
        if observations.is_empty() {
            return Err(EstimationError::EmptyDesign);
        }

        let mut slot: AHashMap<&str, usize> = AHashMap::new();
        let mut grouped: Vec<Vec<&GeeObservation>> = Vec::new();
        for obs in observations {
            let idx = *slot.entry(obs.cluster_id.as_str()).or_insert_with(|| {
                grouped.push(Vec::new());
                grouped.len() - 1
            });
            grouped[idx].push(obs);
        }

        let p = if include_reader { 3 } else { 2 };
        let n = observations.len();
        let mut y = Array1::zeros(n);
        let mut x = Array2::zeros((n, p));
        let mut clusters = Vec::with_capacity(grouped.len());

        let mut row = 0;
        for members in &grouped {
            let start = row;
            for obs in members {
                y[row] = if obs.correct { 1.0 } else { 0.0 };
                x[[row, 0]] = 1.0;
                x[[row, 1]] = obs.mode.indicator();
                if include_reader {
                    x[[row, 2]] = obs.reader_index as f64;
                }
                row += 1;
            }
            clusters.push(start..row);
        }

        let mut covariate_names = vec![INTERCEPT.to_string(), MODE_COVARIATE.to_string()];
        if include_reader {
            covariate_names.push(READER_COVARIATE.to_string());
        }

        Self::from_parts(y, x, clusters, covariate_names)
    }

    /// Validates an explicitly assembled design.
    pub fn from_parts(
        y: Array1<f64>,
        x: Array2<f64>,
        clusters: Vec<Range<usize>>,
        covariate_names: Vec<String>,
    ) -> Result<Self, EstimationError> {
        let n = y.len();
        if n == 0 {
            return Err(EstimationError::EmptyDesign);
        }
        if x.nrows() != n {
            return Err(EstimationError::DesignShape(format!(
                "design matrix has {} rows but the outcome vector has {}",
                x.nrows(),
                n
            )));
        }
        if covariate_names.len() != x.ncols() {
            return Err(EstimationError::DesignShape(format!(
                "{} covariate names for {} design columns",
                covariate_names.len(),
                x.ncols()
            )));
        }
        let mut expected = 0;
        for range in &clusters {
            if range.start != expected || range.end <= range.start {
                return Err(EstimationError::DesignShape(format!(
                    "cluster ranges must tile 0..{n} contiguously; \
                     found {range:?} at row {expected}"
                )));
            }
            expected = range.end;
        }
        if expected != n {
            return Err(EstimationError::DesignShape(format!(
                "cluster ranges cover {expected} of {n} rows"
            )));
        }

        let design = Self {
            y,
            x,
            clusters,
            covariate_names,
        };
        design.log_layout();
        Ok(design)
    }

    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn n_covariates(&self) -> usize {
        self.x.ncols()
    }

    pub fn mean_cluster_size(&self) -> f64 {
        self.n_obs() as f64 / self.n_clusters() as f64
    }

    fn log_layout(&self) {
        let (min, max) = self
            .clusters
            .iter()
            .map(|c| c.len())
            .minmax()
            .into_option()
            .unwrap_or((0, 0));
        log::info!(
            "GEE design: n={}, p={}, clusters={}",
            self.n_obs(),
            self.n_covariates(),
            self.n_clusters()
        );
        log::info!(
            "  Mean cluster size: {:.1} (range: {}-{})",
            self.mean_cluster_size(),
            min,
            max
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(cluster: &str, correct: bool, mode: Mode, reader: usize) -> GeeObservation {
        GeeObservation {
            cluster_id: cluster.to_string(),
            correct,
            mode,
            reader_index: reader,
        }
    }

    #[test]
    fn rows_are_grouped_by_cluster_in_first_appearance_order() {
        let data = vec![
            obs("P2", true, Mode::Assisted, 0),
            obs("P1", false, Mode::Assisted, 0),
            obs("P2", false, Mode::Unaided, 0),
        ];
        let design = GeeDesign::build(&data, false).unwrap();
        assert_eq!(design.clusters, vec![0..2, 2..3]);
        assert_eq!(design.y.to_vec(), vec![1.0, 0.0, 0.0]);
        assert_eq!(design.x.column(1).to_vec(), vec![1.0, 0.0, 1.0]);
        assert_eq!(design.covariate_names, vec![INTERCEPT, MODE_COVARIATE]);
        assert_eq!(design.mean_cluster_size(), 1.5);
    }

    #[test]
    fn reader_column_is_optional() {
        let data = vec![obs("P1", true, Mode::Unaided, 2)];
        let design = GeeDesign::build(&data, true).unwrap();
        assert_eq!(design.n_covariates(), 3);
        assert_eq!(design.x[[0, 2]], 2.0);
        assert_eq!(design.covariate_names[2], READER_COVARIATE);
    }

    #[test]
    fn paired_records_mark_correctness() {
        let assisted = vec![
            ClassificationRecord::new("P1", true, true),
            ClassificationRecord::new("P2", false, true),
        ];
        let unaided = vec![ClassificationRecord::new("P1", false, false)];
        let data = GeeObservation::from_paired_records(&assisted, &unaided, 1);
        assert_eq!(data.len(), 3);
        assert!(data[0].correct && !data[1].correct && data[2].correct);
        assert_eq!(data[2].mode, Mode::Unaided);
        assert!(data.iter().all(|o| o.reader_index == 1));
    }

    #[test]
    fn malformed_designs_are_rejected() {
        assert!(matches!(GeeDesign::build(&[], false), Err(EstimationError::EmptyDesign)));
        let bad = GeeDesign::from_parts(
            Array1::zeros(3),
            Array2::ones((3, 2)),
            vec![0..1, 2..3],
            vec![INTERCEPT.into(), MODE_COVARIATE.into()],
        );
        assert!(matches!(bad, Err(EstimationError::DesignShape(_))));
    }
}

// ========================================================================================
//
//                               STUDY-WIDE ORCHESTRATION
//
// ========================================================================================
//
// Every reader is analyzed independently: patient-level and lesion-level metrics, a
// freshly seeded bootstrap engine, a per-reader GEE fit and a decision-curve
// comparison. Readers run in parallel on the rayon pool; nothing is shared between
// them, so the results are identical to a sequential run. Files are written only after
// all computation has finished, one directory per reader.

use crate::bootstrap::{BootstrapAnalyzer, BootstrapComparison, BootstrapError, SummaryRow};
use crate::config::{AnalysisConfig, ConfigError};
use crate::dca::{DcaComparison, DcaError, DcaSummaryRow, DecisionCurveAnalyzer};
use crate::gee::design::GeeObservation;
use crate::gee::estimate::EstimationError;
use crate::gee::model::{GeeAnalyzer, GeeFit};
use crate::metrics::{LesionComparison, PatientComparison, compare_lesions, compare_modes};
use crate::shared::files::{DataError, OutputError, ReaderData, write_csv, write_json, write_text};
use crate::shared::report;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error(transparent)]
    Dca(#[from] DcaError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("Failed to format report: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Everything computed for one reader.
#[derive(Debug, Clone, Serialize)]
pub struct ReaderAnalysis {
    pub reader: String,
    pub patient: PatientComparison,
    pub lesion: LesionComparison,
    pub bootstrap: BootstrapComparison,
    pub bootstrap_summary: Vec<SummaryRow>,
    /// Absent when the reader has no records at all.
    pub gee: Option<GeeFit>,
    pub dca: DcaComparison,
    pub dca_summary: Vec<DcaSummaryRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudyAnalysis {
    pub readers: Vec<ReaderAnalysis>,
    pub pooled_gee: Option<GeeFit>,
}

/// Runs every engine for one reader.
pub fn analyze_reader(
    data: &ReaderData,
    reader_index: usize,
    config: &AnalysisConfig,
) -> Result<ReaderAnalysis, AnalysisError> {
    log::info!("Analyzing reader '{}'", data.reader);

    let patient = compare_modes(&data.assisted, &data.unaided, config.aggregation);
    let lesion = compare_lesions(&data.assisted, &data.unaided);

    let mut bootstrap_engine = BootstrapAnalyzer::new(config.bootstrap, config.aggregation);
    let bootstrap = bootstrap_engine.run_comparison(&data.assisted, &data.unaided);
    let bootstrap_summary = bootstrap_engine.summary_table()?;

    let observations =
        GeeObservation::from_paired_records(&data.assisted, &data.unaided, reader_index);
    let gee = match GeeAnalyzer::new(config.gee).fit(&observations, false) {
        Ok(fit) => Some(fit),
        Err(EstimationError::EmptyDesign) => {
            log::warn!("Skipping GEE for reader '{}': no observations", data.reader);
            None
        }
        Err(e) => return Err(e.into()),
    };

    let mut dca_engine = DecisionCurveAnalyzer::new(config.dca)?;
    let dca = dca_engine.compare_strategies(
        &patient.assisted.confusion_matrix,
        &patient.unaided.confusion_matrix,
    );
    let dca_summary = dca_engine.summary_table()?;

    log::info!("Finished reader '{}'", data.reader);
    Ok(ReaderAnalysis {
        reader: data.reader.clone(),
        patient,
        lesion,
        bootstrap,
        bootstrap_summary,
        gee,
        dca,
        dca_summary,
    })
}

/// Analyzes all readers in parallel and, when configured, fits a pooled GEE model.
pub fn analyze_study(
    readers: &[ReaderData],
    config: &AnalysisConfig,
) -> Result<StudyAnalysis, AnalysisError> {
    config.validate()?;
    log::info!("Analyzing {} readers", readers.len());

    let pb = internal::create_progress_bar(readers.len() as u64, "readers");
    let analyses = readers
        .par_iter()
        .enumerate()
        .map(|(i, data)| {
            let result = analyze_reader(data, i, config);
            pb.inc(1);
            result
        })
        .collect::<Result<Vec<_>, _>>()?;
    pb.finish_and_clear();

    let pooled_gee = if config.gee.pooled && readers.len() > 1 {
        log::info!("Fitting pooled GEE across {} readers", readers.len());
        let observations: Vec<GeeObservation> = readers
            .iter()
            .enumerate()
            .flat_map(|(i, r)| GeeObservation::from_paired_records(&r.assisted, &r.unaided, i))
            .collect();
        match GeeAnalyzer::new(config.gee).fit(&observations, config.gee.include_reader) {
            Ok(fit) => Some(fit),
            Err(EstimationError::EmptyDesign) => {
                log::warn!("Skipping pooled GEE: no observations");
                None
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        None
    };

    Ok(StudyAnalysis {
        readers: analyses,
        pooled_gee,
    })
}

/// Writes the per-reader artifacts into `<out_dir>/<reader>/`.
pub fn write_reader_outputs(
    analysis: &ReaderAnalysis,
    out_dir: &Path,
    config: &AnalysisConfig,
) -> Result<Vec<PathBuf>, AnalysisError> {
    let dir = out_dir.join(report::reader_dir_name(&analysis.reader));
    let output = &config.output;
    let name = analysis.reader.as_str();
    let mut written = Vec::new();

    if output.json {
        written.push(write_json(&dir.join("patient_metrics.json"), &analysis.patient)?);
        written.push(write_json(&dir.join("lesion_metrics.json"), &analysis.lesion)?);
        if output.raw_samples {
            written.push(write_json(&dir.join("bootstrap_results.json"), &analysis.bootstrap)?);
        } else {
            let mut compact = analysis.bootstrap.clone();
            compact.strip_raw_samples();
            written.push(write_json(&dir.join("bootstrap_results.json"), &compact)?);
        }
        if let Some(fit) = &analysis.gee {
            written.push(write_json(&dir.join("gee_results.json"), fit)?);
        }
        written.push(write_json(&dir.join("dca_results.json"), &analysis.dca)?);
    }

    if output.csv {
        let lesion_rows = report::lesion_rows(&analysis.lesion);
        written.push(write_csv(&dir.join("lesion_metrics.csv"), &lesion_rows)?);
        written.push(write_csv(&dir.join("bootstrap_summary.csv"), &analysis.bootstrap_summary)?);
        if let Some(fit) = &analysis.gee {
            written.push(write_csv(&dir.join("gee_coefficients.csv"), &fit.coefficients)?);
        }
        let curve_rows = report::dca_curve_rows(&analysis.dca);
        written.push(write_csv(&dir.join("dca_curve.csv"), &curve_rows)?);
        written.push(write_csv(&dir.join("dca_summary.csv"), &analysis.dca_summary)?);
    }

    if output.markdown {
        written.push(write_text(
            &dir.join("lesion_report.md"),
            &report::lesion_report(name, &analysis.lesion)?,
        )?);
        written.push(write_text(
            &dir.join("bootstrap_report.md"),
            &report::bootstrap_report(name, &analysis.bootstrap, &analysis.bootstrap_summary)?,
        )?);
        if let Some(fit) = &analysis.gee {
            written.push(write_text(&dir.join("gee_report.md"), &report::gee_report(name, fit)?)?);
        }
        written.push(write_text(
            &dir.join("dca_report.md"),
            &report::dca_report(name, &analysis.dca, &analysis.dca_summary)?,
        )?);
    }

    log::info!("Wrote {} files for reader '{}' to {}", written.len(), name, dir.display());
    Ok(written)
}

/// Writes every reader's artifacts plus the study-wide summary and pooled fit.
pub fn write_study_outputs(
    study: &StudyAnalysis,
    out_dir: &Path,
    config: &AnalysisConfig,
) -> Result<Vec<PathBuf>, AnalysisError> {
    let mut written = Vec::new();
    for analysis in &study.readers {
        written.extend(write_reader_outputs(analysis, out_dir, config)?);
    }
    if config.output.json {
        if let Some(fit) = &study.pooled_gee {
            written.push(write_json(&out_dir.join("pooled_gee.json"), fit)?);
        }
    }
    if config.output.markdown {
        written.push(write_text(
            &out_dir.join("study_summary.md"),
            &report::study_summary(study)?,
        )?);
    }
    Ok(written)
}

mod internal {
    use super::*;

    pub(super) fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };

        let pb = ProgressBar::with_draw_target(Some(len), draw_target);
        let style = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        pb.set_message(message.to_string());
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassificationRecord;

    fn small_config() -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.bootstrap.n_iterations = 50;
        config
    }

    fn reader(name: &str) -> ReaderData {
        let mut data = ReaderData::new(name);
        let reads = [
            (true, true, false),
            (false, false, true),
            (true, true, true),
            (false, false, false),
        ];
        for (i, (gt, a, u)) in reads.into_iter().enumerate() {
            let id = format!("P{i}");
            data.assisted.push(ClassificationRecord::new(id.clone(), gt, a));
            data.unaided.push(ClassificationRecord::new(id, gt, u));
        }
        data
    }

    #[test]
    fn empty_reader_degrades_without_gee() {
        let analysis = analyze_reader(&ReaderData::new("empty"), 0, &small_config()).unwrap();
        assert!(analysis.gee.is_none());
        assert_eq!(analysis.bootstrap.assisted.metrics.sensitivity.mean, 0.0);
        assert!(analysis.dca.delta_net_benefit.iter().all(|&d| d == 0.0));
    }

    #[test]
    fn parallel_study_matches_sequential_readers() {
        let readers = vec![reader("R1"), reader("R2")];
        let config = small_config();
        let study = analyze_study(&readers, &config).unwrap();
        assert_eq!(study.readers.len(), 2);
        assert!(study.pooled_gee.is_some());

        let alone = analyze_reader(&readers[1], 1, &config).unwrap();
        assert_eq!(
            study.readers[1].bootstrap.delta.sensitivity.summary.raw_samples,
            alone.bootstrap.delta.sensitivity.summary.raw_samples
        );
    }

    #[test]
    fn single_reader_study_skips_pooled_fit() {
        let study = analyze_study(&[reader("R1")], &small_config()).unwrap();
        assert!(study.pooled_gee.is_none());
    }
}

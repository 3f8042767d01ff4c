use approx::assert_abs_diff_eq;
use readerstudy::config::DcaSettings;
use readerstudy::dca::{DcaError, DecisionCurveAnalyzer, net_benefit};
use readerstudy::types::ConfusionMatrix;

fn default_analyzer() -> DecisionCurveAnalyzer {
    DecisionCurveAnalyzer::new(DcaSettings::default()).unwrap()
}

#[test]
fn default_grid_spans_five_to_twenty_five_percent() {
    let dca = default_analyzer();
    let t = dca.thresholds();
    assert_eq!(t.len(), 50);
    assert_abs_diff_eq!(t[0], 0.05);
    assert_abs_diff_eq!(t[49], 0.25, epsilon = 1e-12);
    assert!(t.windows(2).all(|w| w[1] > w[0]));
}

#[test]
fn balanced_table_at_ten_percent() {
    let cm = ConfusionMatrix::new(90, 10, 10, 90);
    assert_abs_diff_eq!(net_benefit(&cm, 0.10), 0.4444, epsilon = 1e-4);

    let dca = DecisionCurveAnalyzer::new(DcaSettings {
        threshold_min: 0.10,
        threshold_max: 0.10,
        n_thresholds: 1,
    })
    .unwrap();
    let curve = dca.analyze_strategy(&cm, "AI-Assisted");
    assert_abs_diff_eq!(curve.prevalence, 0.5);
    assert_eq!(curve.n, 200);
    assert_abs_diff_eq!(curve.net_benefit_model[0], 0.45 - 0.05 / 9.0, epsilon = 1e-12);
    assert_abs_diff_eq!(curve.net_benefit_treat_all[0], 0.5 - 0.5 / 9.0, epsilon = 1e-12);
}

#[test]
fn treat_none_is_zero_everywhere() {
    let dca = default_analyzer();
    for cm in [
        ConfusionMatrix::new(0, 0, 0, 0),
        ConfusionMatrix::new(5, 40, 1, 3),
        ConfusionMatrix::new(12, 0, 0, 0),
    ] {
        let curve = dca.analyze_strategy(&cm, "any");
        assert!(curve.net_benefit_treat_none.iter().all(|&nb| nb == 0.0));
        assert!(curve.net_benefit_model.iter().all(|nb| nb.is_finite()));
    }
}

#[test]
fn identical_strategies_have_zero_delta() {
    let mut dca = default_analyzer();
    let cm = ConfusionMatrix::new(33, 7, 9, 51);
    let cmp = dca.compare_strategies(&cm, &cm);
    assert!(cmp.delta_net_benefit.iter().all(|d| d.abs() < 1e-12));
    assert_eq!(cmp.summary.assisted_better_count, 0);
    assert_eq!(cmp.summary.assisted_better_range, None);

    let rows = dca.summary_table().unwrap();
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|r| r.better_strategy == "Equal"));
}

#[test]
fn fewer_false_positives_dominate_everywhere() {
    let mut dca = default_analyzer();
    let assisted = ConfusionMatrix::new(40, 5, 10, 45);
    let unaided = ConfusionMatrix::new(40, 15, 10, 35);
    let cmp = dca.compare_strategies(&assisted, &unaided);

    assert_eq!(cmp.summary.assisted_better_count, cmp.thresholds.len());
    assert_abs_diff_eq!(cmp.summary.assisted_better_fraction, 1.0);
    assert_eq!(cmp.summary.assisted_better_range, Some((0.05, cmp.thresholds[49])));
    // The FP penalty grows with t, so the widest gap is at the top of the grid.
    assert_abs_diff_eq!(cmp.summary.max_delta_threshold, cmp.thresholds[49]);
    assert_abs_diff_eq!(cmp.summary.max_delta, 0.10 * 0.25 / 0.75, epsilon = 1e-12);

    let rows = dca.summary_table().unwrap();
    let thresholds: Vec<f64> = rows.iter().map(|r| r.threshold).collect();
    for (got, want) in thresholds.iter().zip([0.05, 0.10, 0.15, 0.20, 0.25]) {
        assert!((got - want).abs() < 0.0025);
    }
    assert!(rows.iter().all(|r| r.better_strategy == "Assisted" && r.nb_treat_none == 0.0));
}

#[test]
fn summary_before_comparison_is_an_error() {
    assert!(matches!(default_analyzer().summary_table(), Err(DcaError::PrecursorMissing(_))));
}

#[test]
fn malformed_grids_are_rejected() {
    let bad = [
        DcaSettings {
            threshold_min: 0.3,
            threshold_max: 0.1,
            n_thresholds: 10,
        },
        DcaSettings {
            threshold_min: 0.1,
            threshold_max: 0.3,
            n_thresholds: 0,
        },
    ];
    for settings in bad {
        assert!(matches!(DecisionCurveAnalyzer::new(settings), Err(DcaError::InvalidGrid(_))));
    }
}

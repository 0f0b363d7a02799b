//! Selection resolution through the session: row indices are queue-relative,
//! stale selections fall back to the first queued case.

use audit_queue_core::{
    config::AuditConfig,
    queue::{FilterParams, ScoreRange},
    repository::{Dataset, DatasetSource, FeatureValue, ScoreRecord},
    session::{AuditSession, EMPTY_QUEUE_NOTICE},
    RiskTier,
};
use std::collections::BTreeSet;

fn session() -> AuditSession {
    let dataset = Dataset {
        case_ids: Some(vec!["A".into(), "B".into(), "C".into(), "D".into()]),
        records: vec![
            ScoreRecord { risk_score: 0.10, ground_truth_label: 0 },
            ScoreRecord { risk_score: 0.90, ground_truth_label: 1 },
            ScoreRecord { risk_score: 0.55, ground_truth_label: 0 },
            ScoreRecord { risk_score: 0.78, ground_truth_label: 0 },
        ],
        feature_matrix: vec![vec![FeatureValue::Number(0.0)]; 4],
        attribution_matrix: vec![vec![-0.4], vec![0.4], vec![0.05], vec![0.28]],
        feature_names: vec!["amendment_ratio".into()],
    };
    AuditSession::open(DatasetSource::InMemory(dataset), AuditConfig::default()).unwrap()
}

fn only_tiers(tiers: &[RiskTier]) -> FilterParams {
    FilterParams {
        tiers: tiers.iter().copied().collect(),
        ..FilterParams::all()
    }
}

#[test]
fn first_render_selects_first_queued_case() {
    let s = session();
    // Default filters drop the LOW case "A".
    assert_eq!(s.queue_ids(), ["B", "C", "D"]);
    assert_eq!(s.selected(), Some("B"));
    assert_eq!(s.explanation().unwrap().case_id, "B");
}

#[test]
fn row_index_is_resolved_against_the_filtered_queue() {
    let mut s = session();
    // Row 0 of the queue is "B" even though "A" is row 0 of the repository.
    assert_eq!(s.select_row(0).as_deref(), Some("B"));
    assert_eq!(s.select_row(2).as_deref(), Some("D"));
    assert_eq!(s.explanation().unwrap().case_id, "D");
}

#[test]
fn selection_that_leaves_the_queue_falls_back_to_new_first() {
    let mut s = session();
    s.select_row(1);
    assert_eq!(s.selected(), Some("C"));

    // "C" is MODERATE; restricting to HIGH removes it.
    s.apply_filters(only_tiers(&[RiskTier::High])).unwrap();
    assert_eq!(s.queue_ids(), ["B", "D"]);
    assert_eq!(s.selected(), Some("B"));
    assert_eq!(s.explanation().unwrap().case_id, "B");
}

#[test]
fn selection_that_survives_a_filter_change_is_kept() {
    let mut s = session();
    s.select_row(2);
    assert_eq!(s.selected(), Some("D"));
    s.apply_filters(only_tiers(&[RiskTier::High])).unwrap();
    assert_eq!(s.selected(), Some("D"));
}

#[test]
fn empty_queue_means_no_selection_and_a_notice() {
    let mut s = session();
    s.apply_filters(FilterParams {
        tiers: BTreeSet::new(),
        score_range: ScoreRange::FULL,
        labels: BTreeSet::from([0, 1]),
    })
    .unwrap();
    assert_eq!(s.selected(), None);
    assert!(s.explanation().is_none());
    assert_eq!(s.notice().as_deref(), Some(EMPTY_QUEUE_NOTICE));

    let snap = s.snapshot().unwrap();
    assert_eq!(snap.mean_display, "n/a");
    assert!(snap.table.rows.is_empty());
}

#[test]
fn unknown_case_id_falls_back_instead_of_failing() {
    let mut s = session();
    s.select_row(2);
    assert_eq!(s.select_case("does-not-exist").as_deref(), Some("B"));
}

#[test]
fn filtered_out_case_id_falls_back() {
    let mut s = session();
    // "A" exists but is LOW and not queued.
    assert_eq!(s.select_case("A").as_deref(), Some("B"));
    // It can still be explained directly by id.
    assert_eq!(s.explain_case("A").unwrap().tier, RiskTier::Low);
}

#[test]
fn clearing_selection_returns_to_first() {
    let mut s = session();
    s.select_row(2);
    assert_eq!(s.clear_selection().as_deref(), Some("B"));
}

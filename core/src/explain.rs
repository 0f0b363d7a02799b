//! Case explainer: assembles the explanation payload for one case.
//!
//! The determinant factors are chosen here, not by the renderer: features are
//! ranked by absolute attribution (ties keep schema order) and cut to
//! `max_display`. Everything past the cut is summed into a remainder.

use crate::{
    config::AuditConfig,
    error::AuditResult,
    repository::{CaseRepository, FeatureValue},
    tier::{RiskTier, GAUGE_REFERENCE_PCT},
    types::{CaseId, Label},
};
use serde::Serialize;

/// One (feature, value, attribution) triple.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Factor {
    pub feature:         String,
    pub value:           FeatureValue,
    pub attribution:     f64,
    /// Column of this feature in the shared schema.
    pub schema_position: usize,
}

/// Aggregate of the features that did not make the display cut.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Remainder {
    pub feature_count:   usize,
    pub attribution_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplanationPayload {
    pub case_id:              CaseId,
    pub tier:                 RiskTier,
    pub score:                f64,
    pub score_pct:            f64,
    /// Score minus the moderate cutoff, on the 0–100 scale.
    pub delta_from_reference: f64,
    pub label:                Label,
    pub base_value:           f64,
    /// Ranked by descending |attribution|.
    pub factors:              Vec<Factor>,
    pub remainder:            Option<Remainder>,
    /// Sum of every attribution, shown or not.
    pub attribution_total:    f64,
    /// `base_value + attribution_total`.
    pub model_output:         f64,
}

/// One bar of the waterfall chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayRow {
    Factor(Factor),
    /// "N other features".
    Others(Remainder),
}

impl ExplanationPayload {
    /// The displayed factors, back in schema order.
    pub fn factors_in_schema_order(&self) -> Vec<&Factor> {
        let mut out: Vec<&Factor> = self.factors.iter().collect();
        out.sort_by_key(|f| f.schema_position);
        out
    }

    /// Waterfall layout in at most `factors.len()` rows. When features were
    /// cut, the last row is taken by the aggregate of everything not shown.
    pub fn display_rows(&self) -> Vec<DisplayRow> {
        let Some(rest) = &self.remainder else {
            return self.factors.iter().cloned().map(DisplayRow::Factor).collect();
        };
        let keep = self.factors.len().saturating_sub(1);
        let folded = &self.factors[keep..];
        let mut rows: Vec<DisplayRow> =
            self.factors[..keep].iter().cloned().map(DisplayRow::Factor).collect();
        rows.push(DisplayRow::Others(Remainder {
            feature_count:   rest.feature_count + folded.len(),
            attribution_sum: rest.attribution_sum + folded.iter().map(|f| f.attribution).sum::<f64>(),
        }));
        rows
    }
}

/// Build the payload for `case_id`. Unknown ids are `UnknownCaseId`.
pub fn explain(
    case_id: &str,
    repo: &CaseRepository,
    config: &AuditConfig,
) -> AuditResult<ExplanationPayload> {
    let case = repo.lookup(case_id)?;
    let schema = repo.schema();
    let attributions = case.attribution_values();

    let mut ranked: Vec<usize> = (0..schema.len()).collect();
    // Stable sort: equal magnitudes stay in schema order.
    ranked.sort_by(|&a, &b| attributions[b].abs().total_cmp(&attributions[a].abs()));

    let shown = config.max_display.min(ranked.len());
    let factors: Vec<Factor> = ranked[..shown]
        .iter()
        .map(|&j| Factor {
            feature:         schema.names()[j].clone(),
            value:           case.feature_values()[j].clone(),
            attribution:     attributions[j],
            schema_position: j,
        })
        .collect();

    let hidden = &ranked[shown..];
    let remainder = (!hidden.is_empty()).then(|| Remainder {
        feature_count:   hidden.len(),
        attribution_sum: hidden.iter().map(|&j| attributions[j]).sum(),
    });

    let attribution_total: f64 = attributions.iter().sum();
    let score_pct = case.score_pct();

    Ok(ExplanationPayload {
        case_id: case.id().to_string(),
        tier: case.tier(),
        score: case.risk_score(),
        score_pct,
        delta_from_reference: score_pct - GAUGE_REFERENCE_PCT,
        label: case.ground_truth_label(),
        base_value: config.base_value,
        factors,
        remainder,
        attribution_total,
        model_output: config.base_value + attribution_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuditError;
    use crate::repository::{Dataset, ScoreRecord};

    fn repo() -> CaseRepository {
        CaseRepository::from_dataset(Dataset {
            case_ids: Some(vec!["ctr-1".into()]),
            records: vec![ScoreRecord { risk_score: 0.62, ground_truth_label: 0 }],
            feature_matrix: vec![vec![
                FeatureValue::Number(1.0),
                FeatureValue::Number(2.0),
                FeatureValue::Text("x".into()),
                FeatureValue::Number(4.0),
            ]],
            attribution_matrix: vec![vec![0.01, -0.30, 0.05, -0.05]],
            feature_names: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        })
        .unwrap()
    }

    fn config(max_display: usize) -> AuditConfig {
        AuditConfig { max_display, ..AuditConfig::default() }
    }

    #[test]
    fn ranks_by_magnitude_with_schema_order_on_ties() {
        let p = explain("ctr-1", &repo(), &config(8)).unwrap();
        let names: Vec<&str> = p.factors.iter().map(|f| f.feature.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "d", "a"]);
        assert!(p.remainder.is_none());
    }

    #[test]
    fn truncation_moves_the_rest_into_remainder() {
        let p = explain("ctr-1", &repo(), &config(2)).unwrap();
        assert_eq!(p.factors.len(), 2);
        let rest = p.remainder.unwrap();
        assert_eq!(rest.feature_count, 2);
        assert!((rest.attribution_sum - (-0.04)).abs() < 1e-12);
    }

    #[test]
    fn model_output_is_base_plus_all_attributions() {
        let p = explain("ctr-1", &repo(), &config(1)).unwrap();
        assert_eq!(p.base_value, 0.5);
        assert!((p.attribution_total - (-0.29)).abs() < 1e-12);
        assert!((p.model_output - 0.21).abs() < 1e-12);
    }

    #[test]
    fn gauge_fields_use_percentage_scale() {
        let p = explain("ctr-1", &repo(), &config(8)).unwrap();
        assert_eq!(p.tier, RiskTier::Moderate);
        assert!((p.score_pct - 62.0).abs() < 1e-9);
        assert!((p.delta_from_reference - 22.0).abs() < 1e-9);
    }

    #[test]
    fn schema_order_view_of_displayed_factors() {
        let p = explain("ctr-1", &repo(), &config(3)).unwrap();
        let names: Vec<&str> = p
            .factors_in_schema_order()
            .into_iter()
            .map(|f| f.feature.as_str())
            .collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn display_rows_reserve_last_slot_for_other_features() {
        let p = explain("ctr-1", &repo(), &config(3)).unwrap();
        let rows = p.display_rows();
        assert_eq!(rows.len(), 3);
        let names: Vec<&str> = rows
            .iter()
            .filter_map(|r| match r {
                DisplayRow::Factor(f) => Some(f.feature.as_str()),
                DisplayRow::Others(_) => None,
            })
            .collect();
        assert_eq!(names, vec!["b", "c"]);
        match &rows[2] {
            DisplayRow::Others(rest) => {
                assert_eq!(rest.feature_count, 2);
                // d (-0.05) and a (0.01)
                assert!((rest.attribution_sum - (-0.04)).abs() < 1e-12);
            }
            other => panic!("expected aggregate row, got {other:?}"),
        }
    }

    #[test]
    fn display_rows_without_cut_are_the_factors() {
        let p = explain("ctr-1", &repo(), &config(4)).unwrap();
        let rows = p.display_rows();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| matches!(r, DisplayRow::Factor(_))));
    }

    #[test]
    fn single_slot_display_is_all_aggregate() {
        let p = explain("ctr-1", &repo(), &config(1)).unwrap();
        let rows = p.display_rows();
        assert_eq!(rows.len(), 1);
        match &rows[0] {
            DisplayRow::Others(rest) => {
                assert_eq!(rest.feature_count, 4);
                assert!((rest.attribution_sum - p.attribution_total).abs() < 1e-12);
            }
            other => panic!("expected aggregate row, got {other:?}"),
        }
    }

    #[test]
    fn unknown_id_is_reported() {
        let err = explain("nope", &repo(), &config(8)).unwrap_err();
        assert!(matches!(err, AuditError::UnknownCaseId { case_id } if case_id == "nope"));
    }
}

//! Audit queue builder.
//!
//! A queue is a filtered view over the repository, rebuilt from scratch on
//! every filter change. Filtering is conjunctive: a case stays only if its
//! tier, its score and its label all pass. An empty tier set or an empty
//! label set matches nothing.

use crate::{
    error::{AuditError, AuditResult},
    repository::{Case, CaseRepository, FeatureValue},
    tier::RiskTier,
    types::{CaseId, Label, VALID_LABELS},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ── Filters ─────────────────────────────────────────────────────────────────

/// Inclusive score window on the 0–100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl ScoreRange {
    pub const FULL: ScoreRange = ScoreRange { min: 0.0, max: 100.0 };

    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, score_pct: f64) -> bool {
        self.min <= score_pct && score_pct <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    pub tiers:       BTreeSet<RiskTier>,
    pub score_range: ScoreRange,
    pub labels:      BTreeSet<Label>,
}

impl FilterParams {
    /// Everything: all tiers, full range, both labels.
    pub fn all() -> Self {
        Self {
            tiers:       RiskTier::ALL.into_iter().collect(),
            score_range: ScoreRange::FULL,
            labels:      VALID_LABELS.into_iter().collect(),
        }
    }

    /// Reject input outside the filter contract. Empty sets are valid.
    pub fn validate(&self) -> AuditResult<()> {
        let ScoreRange { min, max } = self.score_range;
        if !min.is_finite() || !max.is_finite() {
            return Err(AuditError::InvalidFilter {
                detail: format!("score range [{min}, {max}] is not finite"),
            });
        }
        if min < 0.0 || max > 100.0 || min > max {
            return Err(AuditError::InvalidFilter {
                detail: format!("score range [{min}, {max}] must satisfy 0 <= min <= max <= 100"),
            });
        }
        if let Some(bad) = self.labels.iter().find(|l| !VALID_LABELS.contains(l)) {
            return Err(AuditError::InvalidFilter {
                detail: format!("label {bad} is not one of 0, 1"),
            });
        }
        Ok(())
    }

    /// True iff the case passes all three predicates.
    pub fn matches(&self, case: &Case) -> bool {
        self.tiers.contains(&case.tier())
            && self.score_range.contains(case.score_pct())
            && self.labels.contains(&case.ground_truth_label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Repository insertion order.
    #[default]
    Repository,
    ScoreDescending,
    ScoreAscending,
}

// ── Queue ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSummary {
    pub count:      usize,
    pub high_count: usize,
    /// `None` when the queue is empty. Never reported as zero.
    pub mean_score: Option<f64>,
}

impl QueueSummary {
    fn of(cases: &[&Case]) -> Self {
        let count = cases.len();
        let high_count = cases.iter().filter(|c| c.tier() == RiskTier::High).count();
        let mean_score = if count == 0 {
            None
        } else {
            Some(cases.iter().map(|c| c.risk_score()).sum::<f64>() / count as f64)
        };
        Self { count, high_count, mean_score }
    }

    /// Mean as a float, NaN when undefined.
    pub fn mean_score_or_nan(&self) -> f64 {
        self.mean_score.unwrap_or(f64::NAN)
    }

    /// KPI text: "65.0%", or "n/a" for an empty queue.
    pub fn mean_score_display(&self) -> String {
        match self.mean_score {
            Some(m) => format!("{:.1}%", m * 100.0),
            None    => "n/a".to_string(),
        }
    }
}

/// Ordered, filtered view borrowing the repository's cases.
#[derive(Debug, Clone)]
pub struct AuditQueue<'r> {
    cases: Vec<&'r Case>,
}

/// Result of one `build()` call.
#[derive(Debug, Clone)]
pub struct BuiltQueue<'r> {
    pub queue:   AuditQueue<'r>,
    pub summary: QueueSummary,
}

/// Apply `filters` to the repository. Pure: same inputs, same queue.
pub fn build<'r>(repo: &'r CaseRepository, filters: &FilterParams) -> BuiltQueue<'r> {
    let cases: Vec<&Case> = repo.cases().iter().filter(|c| filters.matches(c)).collect();
    let summary = QueueSummary::of(&cases);
    BuiltQueue { queue: AuditQueue { cases }, summary }
}

impl<'r> AuditQueue<'r> {
    /// Rebuild a queue from previously resolved ids, in the given order.
    pub fn from_ids(repo: &'r CaseRepository, ids: &[CaseId]) -> AuditResult<Self> {
        let cases = ids
            .iter()
            .map(|id| repo.lookup(id))
            .collect::<AuditResult<Vec<_>>>()?;
        Ok(Self { cases })
    }

    pub fn cases(&self) -> &[&'r Case] {
        &self.cases
    }

    pub fn ids(&self) -> Vec<CaseId> {
        self.cases.iter().map(|c| c.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn first(&self) -> Option<&'r Case> {
        self.cases.first().copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cases.iter().any(|c| c.id() == id)
    }

    /// Reorder on explicit request. Stable: ties keep their current order.
    pub fn sorted(mut self, order: SortOrder) -> Self {
        match order {
            SortOrder::Repository => {}
            SortOrder::ScoreDescending => self
                .cases
                .sort_by(|a, b| b.risk_score().total_cmp(&a.risk_score())),
            SortOrder::ScoreAscending => self
                .cases
                .sort_by(|a, b| a.risk_score().total_cmp(&b.risk_score())),
        }
        self
    }

    /// Translate a queue-relative row into a case id.
    pub fn case_id_at(&self, row: usize) -> AuditResult<CaseId> {
        self.cases
            .get(row)
            .map(|c| c.id().to_string())
            .ok_or(AuditError::RowOutOfRange { row, len: self.cases.len() })
    }

    pub fn resolve_selection(&self, previous: Option<&str>) -> Option<CaseId> {
        resolve_selection(&self.ids(), previous)
    }

    /// Table rows with the first `feature_count` schema columns.
    pub fn table(&self, repo: &CaseRepository, feature_count: usize) -> QueueTable {
        let n = feature_count.min(repo.schema().len());
        QueueTable {
            feature_columns: repo.schema().names()[..n].to_vec(),
            rows: self
                .cases
                .iter()
                .map(|c| QueueRow {
                    case_id:   c.id().to_string(),
                    tier:      c.tier(),
                    score:     c.risk_score(),
                    label:     c.ground_truth_label(),
                    features:  c.feature_values()[..n].to_vec(),
                })
                .collect(),
        }
    }
}

// ── Selection ───────────────────────────────────────────────────────────────

/// Keep `previous` if it is still queued, otherwise fall back to the first
/// queued case, or to no selection when the queue is empty.
pub fn resolve_selection(queue_ids: &[CaseId], previous: Option<&str>) -> Option<CaseId> {
    if let Some(prev) = previous {
        if queue_ids.iter().any(|id| id == prev) {
            return Some(prev.to_string());
        }
        log::debug!("Selection '{prev}' left the queue; falling back to first case");
    }
    queue_ids.first().cloned()
}

// ── Table ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueRow {
    pub case_id:  CaseId,
    pub tier:     RiskTier,
    pub score:    f64,
    pub label:    Label,
    pub features: Vec<FeatureValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueTable {
    pub feature_columns: Vec<String>,
    pub rows:            Vec<QueueRow>,
}

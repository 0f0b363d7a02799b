//! Auditor session: the state one user interacts with.
//!
//! RULES:
//!   - The repository is loaded once, at `open()`, and replaced only by `reload()`.
//!   - A filter change is computed in full before it replaces the current view.
//!     A rejected change leaves the previous view untouched.
//!   - Selections are case ids. Row indices are resolved against the current
//!     queue immediately and never used to index the repository.
//!   - Selection problems are recovered here by falling back to the first
//!     queued case; they never fail the session.

use crate::{
    config::AuditConfig,
    error::AuditResult,
    explain::{explain, ExplanationPayload},
    export,
    queue::{self, resolve_selection, AuditQueue, FilterParams, QueueSummary, QueueTable, SortOrder},
    repository::{CaseRepository, DatasetLoader, DatasetSource},
    types::{CaseId, SessionId},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

pub const EMPTY_QUEUE_NOTICE: &str = "No matching cases for the current filters.";

/// The queue as last computed for a set of filters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueView {
    pub filters:  FilterParams,
    pub sort:     SortOrder,
    pub case_ids: Vec<CaseId>,
    pub summary:  QueueSummary,
}

impl QueueView {
    fn compute(repo: &CaseRepository, filters: FilterParams, sort: SortOrder) -> Self {
        let built = queue::build(repo, &filters);
        let case_ids = built.queue.sorted(sort).ids();
        Self { filters, sort, case_ids, summary: built.summary }
    }

    pub fn is_empty(&self) -> bool {
        self.case_ids.is_empty()
    }
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id:   SessionId,
    pub started_at:   DateTime<Utc>,
    pub dataset:      String,
    pub total_cases:  usize,
    pub filters:      FilterParams,
    pub sort:         SortOrder,
    pub summary:      QueueSummary,
    pub mean_display: String,
    pub table:        QueueTable,
    pub selected:     Option<CaseId>,
    pub explanation:  Option<ExplanationPayload>,
    /// User-visible notice, e.g. for an empty queue.
    pub notice:       Option<String>,
}

pub struct AuditSession {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    config:         AuditConfig,
    loader:         DatasetLoader,
    repo:           Arc<CaseRepository>,
    view:           QueueView,
    selected:       Option<CaseId>,
    rebuilds:       u64,
}

impl AuditSession {
    /// Load the dataset and build the initial queue from the configured
    /// default filters. Fails on unusable data or config.
    pub fn open(source: DatasetSource, config: AuditConfig) -> AuditResult<Self> {
        config.validate()?;
        let mut loader = DatasetLoader::new(source);
        let repo = loader.load()?;
        let view = QueueView::compute(&repo, config.default_filters.clone(), SortOrder::default());
        let selected = resolve_selection(&view.case_ids, None);

        let session = Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            config,
            loader,
            repo,
            view,
            selected,
            rebuilds: 1,
        };
        log::info!(
            "Session {} opened: {} of {} cases queued",
            session.session_id,
            session.view.summary.count,
            session.repo.len()
        );
        Ok(session)
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<CaseRepository> {
        &self.repo
    }

    pub fn view(&self) -> &QueueView {
        &self.view
    }

    pub fn filters(&self) -> &FilterParams {
        &self.view.filters
    }

    pub fn summary(&self) -> &QueueSummary {
        &self.view.summary
    }

    pub fn queue_ids(&self) -> &[CaseId] {
        &self.view.case_ids
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Number of times the queue was actually recomputed.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    // ── Filter changes ─────────────────────────────────────────

    /// Replace the filters and the queue in one step. Invalid filters are
    /// rejected and the current view is kept.
    pub fn apply_filters(&mut self, filters: FilterParams) -> AuditResult<&QueueView> {
        filters.validate()?;
        self.replace_view(filters, self.view.sort);
        Ok(&self.view)
    }

    /// Explicit sort request; applies to the current filters.
    pub fn set_sort(&mut self, sort: SortOrder) -> &QueueView {
        self.replace_view(self.view.filters.clone(), sort);
        &self.view
    }

    fn replace_view(&mut self, filters: FilterParams, sort: SortOrder) {
        if filters == self.view.filters && sort == self.view.sort {
            log::debug!("Queue unchanged for identical filters; reusing view");
            return;
        }
        let view = QueueView::compute(&self.repo, filters, sort);
        let selected = resolve_selection(&view.case_ids, self.selected.as_deref());
        self.view = view;
        self.selected = selected;
        self.rebuilds += 1;
        log::debug!(
            "Queue rebuilt: {} cases, {} high",
            self.view.summary.count,
            self.view.summary.high_count
        );
    }

    // ── Selection ──────────────────────────────────────────────

    /// Select by queue-relative row. Out-of-range rows fall back to the
    /// default selection.
    pub fn select_row(&mut self, row: usize) -> Option<CaseId> {
        match self.view.case_ids.get(row) {
            Some(id) => self.selected = Some(id.clone()),
            None => {
                log::warn!(
                    "Row {row} outside queue of {}; using default selection",
                    self.view.case_ids.len()
                );
                self.selected = resolve_selection(&self.view.case_ids, self.selected.as_deref());
            }
        }
        self.selected.clone()
    }

    /// Select by case id. Ids that are unknown or filtered out fall back to
    /// the default selection.
    pub fn select_case(&mut self, case_id: &str) -> Option<CaseId> {
        if !self.repo.contains(case_id) {
            log::warn!("Unknown case id '{case_id}'; using default selection");
        }
        self.selected = resolve_selection(&self.view.case_ids, Some(case_id));
        self.selected.clone()
    }

    /// Drop the explicit selection; the first queued case becomes selected.
    pub fn clear_selection(&mut self) -> Option<CaseId> {
        self.selected = resolve_selection(&self.view.case_ids, None);
        self.selected.clone()
    }

    // ── Outputs ────────────────────────────────────────────────

    /// Explanation for the current selection, `None` when nothing is selected.
    pub fn explanation(&self) -> Option<ExplanationPayload> {
        let id = self.selected.as_deref()?;
        match explain(id, &self.repo, &self.config) {
            Ok(payload) => Some(payload),
            Err(e) => {
                log::warn!("Cannot explain selection: {e}");
                None
            }
        }
    }

    /// Explain any case in the repository, queued or not.
    pub fn explain_case(&self, case_id: &str) -> AuditResult<ExplanationPayload> {
        explain(case_id, &self.repo, &self.config)
    }

    pub fn table(&self) -> AuditResult<QueueTable> {
        let queue = AuditQueue::from_ids(&self.repo, &self.view.case_ids)?;
        Ok(queue.table(&self.repo, self.config.table_feature_count))
    }

    /// Write the current queue as CSV. Returns the number of case rows.
    pub fn export_csv<W: Write>(&self, out: &mut W) -> AuditResult<usize> {
        let table = self.table()?;
        export::write_csv(&table, out)?;
        log::info!("Exported {} cases", table.rows.len());
        Ok(table.rows.len())
    }

    pub fn notice(&self) -> Option<String> {
        self.view.is_empty().then(|| EMPTY_QUEUE_NOTICE.to_string())
    }

    pub fn snapshot(&self) -> AuditResult<SessionSnapshot> {
        Ok(SessionSnapshot {
            session_id:   self.session_id.clone(),
            started_at:   self.started_at,
            dataset:      self.loader.source().describe(),
            total_cases:  self.repo.len(),
            filters:      self.view.filters.clone(),
            sort:         self.view.sort,
            summary:      self.view.summary.clone(),
            mean_display: self.view.summary.mean_score_display(),
            table:        self.table()?,
            selected:     self.selected.clone(),
            explanation:  self.explanation(),
            notice:       self.notice(),
        })
    }

    // ── Reload ─────────────────────────────────────────────────

    /// Re-read the dataset source and rebuild the queue under the current
    /// filters. On failure the session keeps its previous dataset.
    pub fn reload(&mut self) -> AuditResult<()> {
        let repo = self.loader.reload()?;
        let view = QueueView::compute(&repo, self.view.filters.clone(), self.view.sort);
        self.selected = resolve_selection(&view.case_ids, self.selected.as_deref());
        self.repo = repo;
        self.view = view;
        self.rebuilds += 1;
        log::info!("Session {} reloaded {} cases", self.session_id, self.repo.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{Dataset, FeatureValue, ScoreRecord};

    fn dataset() -> Dataset {
        Dataset {
            case_ids: None,
            records: vec![
                ScoreRecord { risk_score: 0.80, ground_truth_label: 1 },
                ScoreRecord { risk_score: 0.50, ground_truth_label: 0 },
                ScoreRecord { risk_score: 0.10, ground_truth_label: 0 },
            ],
            feature_matrix: vec![vec![FeatureValue::Number(1.0)]; 3],
            attribution_matrix: vec![vec![0.3], vec![0.0], vec![-0.4]],
            feature_names: vec!["f".into()],
        }
    }

    fn session() -> AuditSession {
        AuditSession::open(DatasetSource::InMemory(dataset()), AuditConfig::default()).unwrap()
    }

    #[test]
    fn opens_with_default_filters_and_first_case_selected() {
        let s = session();
        assert_eq!(s.queue_ids(), ["0", "1"]);
        assert_eq!(s.selected(), Some("0"));
        assert!(s.notice().is_none());
    }

    #[test]
    fn identical_filters_do_not_rebuild() {
        let mut s = session();
        let before = s.rebuilds();
        let same = s.filters().clone();
        s.apply_filters(same).unwrap();
        assert_eq!(s.rebuilds(), before);
    }

    #[test]
    fn invalid_filters_leave_view_untouched() {
        let mut s = session();
        let before = s.view().clone();
        let mut bad = s.filters().clone();
        bad.score_range = crate::queue::ScoreRange::new(90.0, 10.0);
        assert!(s.apply_filters(bad).is_err());
        assert_eq!(s.view(), &before);
    }

    #[test]
    fn out_of_range_row_falls_back_instead_of_failing() {
        let mut s = session();
        s.select_row(1);
        assert_eq!(s.selected(), Some("1"));
        assert_eq!(s.select_row(42), Some("1".into()));
    }

    #[test]
    fn sort_is_explicit() {
        let mut s = session();
        s.apply_filters(FilterParams::all()).unwrap();
        assert_eq!(s.queue_ids(), ["0", "1", "2"]);
        s.set_sort(SortOrder::ScoreAscending);
        assert_eq!(s.queue_ids(), ["2", "1", "0"]);
    }
}

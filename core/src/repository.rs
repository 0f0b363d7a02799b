//! Case repository: the immutable per-session dataset.
//!
//! RULE: The repository is validated once, at load, and never mutated.
//! Everything downstream (queue, explainer, export) reads through
//! `Arc<CaseRepository>` and joins on `CaseId`, never on positions.

use crate::{
    error::{AuditError, AuditResult},
    store::DatasetStore,
    tier::{classify, RiskTier},
    types::{CaseId, Label, VALID_LABELS},
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ── Raw dataset (external contract) ─────────────────────────────────────────

/// One feature cell. Numeric for most columns, text for categorical ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
    Missing,
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Number(v) => write!(f, "{v}"),
            FeatureValue::Text(s)   => f.write_str(s),
            FeatureValue::Missing   => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub risk_score:         f64,
    pub ground_truth_label: i64,
}

/// The artifact exported by the model/feature store, before validation.
///
/// Row `i` of `records`, `feature_matrix` and `attribution_matrix` describe
/// the same case; column `j` of both matrices is `feature_names[j]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// Optional explicit identifiers. Row positions are used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_ids:           Option<Vec<CaseId>>,
    pub records:            Vec<ScoreRecord>,
    pub feature_matrix:     Vec<Vec<FeatureValue>>,
    pub attribution_matrix: Vec<Vec<f64>>,
    pub feature_names:      Vec<String>,
}

impl Dataset {
    /// Read a JSON artifact. A missing or unparseable file is `DataUnavailable`.
    pub fn from_json_file(path: &Path) -> AuditResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AuditError::DataUnavailable {
            source_path: path.display().to_string(),
            reason:      e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| AuditError::DataUnavailable {
            source_path: path.display().to_string(),
            reason:      format!("corrupt artifact: {e}"),
        })
    }

    pub fn write_json_file(&self, path: &Path) -> AuditResult<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Identifier of row `i`: the explicit id, or the row position.
    fn id_at(&self, i: usize) -> CaseId {
        match &self.case_ids {
            Some(ids) => ids[i].clone(),
            None      => i.to_string(),
        }
    }
}

// ── Validated model ─────────────────────────────────────────────────────────

/// Ordered feature names shared by every case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> AuditResult<Self> {
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(AuditError::schema(format!("duplicate feature name '{name}'")));
            }
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, position: usize) -> Option<&str> {
        self.names.get(position).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One audited entity. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Case {
    id:                 CaseId,
    risk_score:         f64,
    ground_truth_label: Label,
    feature_values:     Vec<FeatureValue>,
    attribution_values: Vec<f64>,
}

impl Case {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn risk_score(&self) -> f64 {
        self.risk_score
    }

    /// Score on the 0–100 scale the filters use.
    pub fn score_pct(&self) -> f64 {
        self.risk_score * 100.0
    }

    /// Derived on every call; there is no stored tier to drift.
    pub fn tier(&self) -> RiskTier {
        classify(self.risk_score)
    }

    pub fn ground_truth_label(&self) -> Label {
        self.ground_truth_label
    }

    pub fn feature_values(&self) -> &[FeatureValue] {
        &self.feature_values
    }

    pub fn attribution_values(&self) -> &[f64] {
        &self.attribution_values
    }
}

#[derive(Debug)]
pub struct CaseRepository {
    cases:  Vec<Case>,
    schema: FeatureSchema,
    index:  HashMap<CaseId, usize>,
}

impl CaseRepository {
    /// Validate a raw dataset. Any structural problem is a `SchemaMismatch`.
    pub fn from_dataset(dataset: Dataset) -> AuditResult<Self> {
        let n = dataset.records.len();
        if dataset.feature_matrix.len() != n || dataset.attribution_matrix.len() != n {
            return Err(AuditError::schema(format!(
                "row counts differ: {} records, {} feature rows, {} attribution rows",
                n,
                dataset.feature_matrix.len(),
                dataset.attribution_matrix.len()
            )));
        }
        if let Some(ids) = &dataset.case_ids {
            if ids.len() != n {
                return Err(AuditError::schema(format!(
                    "{} case ids for {} records",
                    ids.len(),
                    n
                )));
            }
        }

        let width = dataset.feature_names.len();
        let mut index = HashMap::with_capacity(n);
        let mut cases = Vec::with_capacity(n);

        for i in 0..n {
            let id = dataset.id_at(i);
            if id.is_empty() {
                return Err(AuditError::schema(format!("row {i} has an empty case id")));
            }
            if index.insert(id.clone(), i).is_some() {
                return Err(AuditError::schema(format!("duplicate case id '{id}'")));
            }

            let record = &dataset.records[i];
            if !record.risk_score.is_finite() || !(0.0..=1.0).contains(&record.risk_score) {
                return Err(AuditError::schema(format!(
                    "case '{id}': risk_score {} outside [0,1]",
                    record.risk_score
                )));
            }
            let label = u8::try_from(record.ground_truth_label)
                .ok()
                .filter(|l| VALID_LABELS.contains(l))
                .ok_or_else(|| {
                    AuditError::schema(format!(
                        "case '{id}': ground_truth_label {} outside {{0,1}}",
                        record.ground_truth_label
                    ))
                })?;

            let features = &dataset.feature_matrix[i];
            let attributions = &dataset.attribution_matrix[i];
            if features.len() != width || attributions.len() != width {
                return Err(AuditError::schema(format!(
                    "case '{id}': {} feature values and {} attributions for {} features",
                    features.len(),
                    attributions.len(),
                    width
                )));
            }
            if let Some(j) = attributions.iter().position(|a| !a.is_finite()) {
                return Err(AuditError::schema(format!(
                    "case '{id}': attribution for '{}' is not finite",
                    dataset.feature_names[j]
                )));
            }

            cases.push(Case {
                id,
                risk_score: record.risk_score,
                ground_truth_label: label,
                feature_values: features.clone(),
                attribution_values: attributions.clone(),
            });
        }

        let schema = FeatureSchema::new(dataset.feature_names)?;
        Ok(Self { cases, schema, index })
    }

    /// Cases in repository (insertion) order.
    pub fn cases(&self) -> &[Case] {
        &self.cases
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn get(&self, id: &str) -> Option<&Case> {
        self.index.get(id).map(|&i| &self.cases[i])
    }

    pub fn lookup(&self, id: &str) -> AuditResult<&Case> {
        self.get(id).ok_or_else(|| AuditError::UnknownCaseId { case_id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

// ── Load-once access ────────────────────────────────────────────────────────

/// Where the dataset comes from.
#[derive(Debug, Clone)]
pub enum DatasetSource {
    JsonFile(PathBuf),
    Sqlite(PathBuf),
    InMemory(Dataset),
}

impl DatasetSource {
    /// `.db` / `.sqlite` / `.sqlite3` open the SQLite store; anything else is JSON.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match path.extension().and_then(|e| e.to_str()) {
            Some("db" | "sqlite" | "sqlite3") => DatasetSource::Sqlite(path),
            _ => DatasetSource::JsonFile(path),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            DatasetSource::JsonFile(p) => format!("json:{}", p.display()),
            DatasetSource::Sqlite(p)   => format!("sqlite:{}", p.display()),
            DatasetSource::InMemory(d) => format!("memory:{} cases", d.records.len()),
        }
    }

    /// Read the raw, unvalidated dataset.
    pub fn read_dataset(&self) -> AuditResult<Dataset> {
        match self {
            DatasetSource::JsonFile(p) => Dataset::from_json_file(p),
            DatasetSource::Sqlite(p) => {
                if !p.exists() {
                    return Err(AuditError::DataUnavailable {
                        source_path: p.display().to_string(),
                        reason:      "file not found".into(),
                    });
                }
                // A file that is not SQLite, or was never imported into, holds no dataset.
                let unavailable = |e: AuditError| match e {
                    AuditError::Database(err) => AuditError::DataUnavailable {
                        source_path: p.display().to_string(),
                        reason:      format!("no dataset in store: {err}"),
                    },
                    other => other,
                };
                DatasetStore::open(&p.to_string_lossy())
                    .and_then(|store| store.load_dataset())
                    .map_err(unavailable)
            }
            DatasetSource::InMemory(d) => Ok(d.clone()),
        }
    }
}

/// Holds the validated repository for one session.
///
/// `load()` validates on first call and hands out the same `Arc` afterwards.
/// Only `reload()` reads the source again.
pub struct DatasetLoader {
    source: DatasetSource,
    cached: Option<Arc<CaseRepository>>,
}

impl DatasetLoader {
    pub fn new(source: DatasetSource) -> Self {
        Self { source, cached: None }
    }

    pub fn source(&self) -> &DatasetSource {
        &self.source
    }

    pub fn is_loaded(&self) -> bool {
        self.cached.is_some()
    }

    pub fn load(&mut self) -> AuditResult<Arc<CaseRepository>> {
        if let Some(repo) = &self.cached {
            log::debug!("Dataset cache hit ({})", self.source.describe());
            return Ok(Arc::clone(repo));
        }
        let repo = Arc::new(CaseRepository::from_dataset(self.source.read_dataset()?)?);
        log::info!(
            "Loaded {} cases x {} features from {}",
            repo.len(),
            repo.schema().len(),
            self.source.describe()
        );
        self.cached = Some(Arc::clone(&repo));
        Ok(repo)
    }

    /// Drop the cached repository and read the source again.
    /// On failure the previous repository is kept.
    pub fn reload(&mut self) -> AuditResult<Arc<CaseRepository>> {
        let previous = self.cached.take();
        match self.load() {
            Ok(repo) => Ok(repo),
            Err(e) => {
                self.cached = previous;
                Err(e)
            }
        }
    }
}

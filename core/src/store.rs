//! SQLite dataset store.
//!
//! RULE: Only store.rs talks to the database.
//! The store holds model output only; audit decisions are never written here.

use crate::{
    error::{AuditError, AuditResult},
    repository::{CaseRepository, Dataset, FeatureValue, ScoreRecord},
};
use rusqlite::{params, Connection, OptionalExtension};

pub struct DatasetStore {
    conn: Connection,
}

impl DatasetStore {
    /// Open (or create) the dataset database at `path`.
    pub fn open(path: &str) -> AuditResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> AuditResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> AuditResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_dataset.sql"))?;
        Ok(())
    }

    // ── Import ─────────────────────────────────────────────────

    /// Replace the stored dataset with `dataset`, in one transaction.
    /// The dataset is validated first; an invalid one leaves the store as it was.
    /// Row positions become explicit case ids when the dataset has none.
    pub fn import_dataset(&self, dataset: &Dataset, source: &str) -> AuditResult<()> {
        let repo = CaseRepository::from_dataset(dataset.clone())?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "DELETE FROM case_feature; DELETE FROM case_record;
             DELETE FROM feature; DELETE FROM dataset_meta;",
        )?;

        for (pos, name) in repo.schema().names().iter().enumerate() {
            tx.execute(
                "INSERT INTO feature (position, name) VALUES (?1, ?2)",
                params![pos as i64, name],
            )?;
        }

        for (row, case) in repo.cases().iter().enumerate() {
            tx.execute(
                "INSERT INTO case_record (position, case_id, risk_score, ground_truth_label)
                 VALUES (?1, ?2, ?3, ?4)",
                params![row as i64, case.id(), case.risk_score(), case.ground_truth_label()],
            )?;

            let cells = case.feature_values().iter().zip(case.attribution_values());
            for (col, (value, attribution)) in cells.enumerate() {
                let (num, text) = match value {
                    FeatureValue::Number(v) => (Some(*v), None),
                    FeatureValue::Text(s)   => (None, Some(s.as_str())),
                    FeatureValue::Missing   => (None, None),
                };
                tx.execute(
                    "INSERT INTO case_feature
                       (case_position, feature_position, value_num, value_text, attribution)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![row as i64, col as i64, num, text, attribution],
                )?;
            }
        }

        tx.execute(
            "INSERT INTO dataset_meta (key, value) VALUES ('source', ?1), ('imported_at', ?2)",
            params![source, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        log::info!(
            "Imported {} cases x {} features from {source}",
            repo.len(),
            repo.schema().len()
        );
        Ok(())
    }

    // ── Read ───────────────────────────────────────────────────

    /// Rebuild the raw dataset. Validation is left to `CaseRepository`.
    pub fn load_dataset(&self) -> AuditResult<Dataset> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM feature ORDER BY position ASC")?;
        let feature_names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT position, case_id, risk_score, ground_truth_label
             FROM case_record ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    ScoreRecord {
                        risk_score:         row.get(2)?,
                        ground_truth_label: row.get(3)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut case_ids = Vec::with_capacity(rows.len());
        let mut records = Vec::with_capacity(rows.len());
        let mut positions = std::collections::HashMap::with_capacity(rows.len());
        for (i, (position, case_id, record)) in rows.into_iter().enumerate() {
            positions.insert(position, i);
            case_ids.push(case_id);
            records.push(record);
        }

        let mut feature_matrix = vec![Vec::new(); records.len()];
        let mut attribution_matrix = vec![Vec::new(); records.len()];
        let mut stmt = self.conn.prepare(
            "SELECT case_position, feature_position, value_num, value_text, attribution
             FROM case_feature ORDER BY case_position ASC, feature_position ASC",
        )?;
        let mut cells = stmt.query([])?;
        while let Some(row) = cells.next()? {
            let case_position: i64 = row.get(0)?;
            let feature_position: i64 = row.get(1)?;
            let i = *positions.get(&case_position).ok_or_else(|| {
                AuditError::schema(format!("feature cell for unknown case position {case_position}"))
            })?;
            if feature_position as usize != feature_matrix[i].len() {
                return Err(AuditError::schema(format!(
                    "case '{}': feature column {feature_position} out of order",
                    case_ids[i]
                )));
            }
            let value = match (row.get::<_, Option<f64>>(2)?, row.get::<_, Option<String>>(3)?) {
                (Some(v), _)    => FeatureValue::Number(v),
                (None, Some(s)) => FeatureValue::Text(s),
                (None, None)    => FeatureValue::Missing,
            };
            feature_matrix[i].push(value);
            attribution_matrix[i].push(row.get(4)?);
        }

        Ok(Dataset {
            case_ids: Some(case_ids),
            records,
            feature_matrix,
            attribution_matrix,
            feature_names,
        })
    }

    pub fn case_count(&self) -> AuditResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM case_record", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn meta(&self, key: &str) -> AuditResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM dataset_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        Dataset {
            case_ids: Some(vec!["ctr-7".into(), "ctr-9".into()]),
            records: vec![
                ScoreRecord { risk_score: 0.9, ground_truth_label: 1 },
                ScoreRecord { risk_score: 0.3, ground_truth_label: 0 },
            ],
            feature_matrix: vec![
                vec![FeatureValue::Number(10.0), FeatureValue::Text("pregao".into())],
                vec![FeatureValue::Missing, FeatureValue::Text("dispensa".into())],
            ],
            attribution_matrix: vec![vec![0.25, 0.1], vec![-0.05, -0.2]],
            feature_names: vec!["valor".into(), "modalidade".into()],
        }
    }

    fn store() -> DatasetStore {
        let store = DatasetStore::in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    #[test]
    fn import_then_load_preserves_ids_cells_and_order() {
        let store = store();
        store.import_dataset(&dataset(), "unit").unwrap();
        let loaded = store.load_dataset().unwrap();

        assert_eq!(loaded.case_ids, Some(vec!["ctr-7".to_string(), "ctr-9".to_string()]));
        assert_eq!(loaded.feature_names, vec!["valor", "modalidade"]);
        assert_eq!(loaded.feature_matrix[1][0], FeatureValue::Missing);
        assert_eq!(loaded.feature_matrix[1][1], FeatureValue::Text("dispensa".into()));
        assert_eq!(loaded.attribution_matrix[0], vec![0.25, 0.1]);
        assert_eq!(store.case_count().unwrap(), 2);
        assert_eq!(store.meta("source").unwrap().as_deref(), Some("unit"));
    }

    #[test]
    fn reimport_replaces_previous_dataset() {
        let store = store();
        store.import_dataset(&dataset(), "first").unwrap();
        let mut smaller = dataset();
        smaller.case_ids = Some(vec!["only".into()]);
        smaller.records.truncate(1);
        smaller.feature_matrix.truncate(1);
        smaller.attribution_matrix.truncate(1);
        store.import_dataset(&smaller, "second").unwrap();
        assert_eq!(store.case_count().unwrap(), 1);
        assert_eq!(store.meta("source").unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn misaligned_dataset_is_rejected_before_writing() {
        let store = store();
        store.import_dataset(&dataset(), "good").unwrap();

        let mut bad = dataset();
        bad.feature_matrix[0].push(FeatureValue::Number(3.0));
        let err = store.import_dataset(&bad, "bad").unwrap_err();
        assert!(matches!(err, AuditError::SchemaMismatch { .. }), "{err}");

        // Previous import untouched.
        assert_eq!(store.case_count().unwrap(), 2);
        assert_eq!(store.meta("source").unwrap().as_deref(), Some("good"));
    }

    #[test]
    fn missing_row_is_rejected_instead_of_stored_empty() {
        let store = store();
        let mut bad = dataset();
        bad.attribution_matrix.pop();
        assert!(matches!(
            store.import_dataset(&bad, "bad"),
            Err(AuditError::SchemaMismatch { .. })
        ));
        assert_eq!(store.case_count().unwrap(), 0);
    }

    #[test]
    fn missing_meta_key_is_none() {
        assert_eq!(store().meta("source").unwrap(), None);
    }
}

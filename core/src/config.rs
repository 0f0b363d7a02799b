use crate::{
    error::{AuditError, AuditResult},
    queue::{FilterParams, ScoreRange},
    tier::RiskTier,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const CONFIG_FILE: &str = "audit_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Reference output the attributions are measured from.
    /// Same for every case; not derived from the dataset.
    pub base_value: f64,
    /// Number of determinant factors shown per explanation.
    pub max_display: usize,
    /// Feature columns shown next to tier/score/label in the queue table and export.
    pub table_feature_count: usize,
    /// Filters applied when a session opens.
    pub default_filters: FilterParams,
    pub export_file_name: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            base_value:          0.5,
            max_display:         8,
            table_feature_count: 5,
            default_filters: FilterParams {
                tiers:       BTreeSet::from([RiskTier::High, RiskTier::Moderate]),
                score_range: ScoreRange::FULL,
                labels:      BTreeSet::from([0, 1]),
            },
            export_file_name: "audit_work_order.csv".into(),
        }
    }
}

impl AuditConfig {
    /// Load from `{data_dir}/audit_config.json`. Missing keys take defaults.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/{CONFIG_FILE}");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: AuditConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `data_dir` if the file exists, otherwise use defaults.
    pub fn load_or_default(data_dir: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(&format!("{data_dir}/{CONFIG_FILE}")).exists() {
            Self::load(data_dir)
        } else {
            log::debug!("No {CONFIG_FILE} in {data_dir}; using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> AuditResult<()> {
        if !self.base_value.is_finite() {
            return Err(AuditError::InvalidConfig {
                detail: format!("base_value {} is not finite", self.base_value),
            });
        }
        if self.max_display == 0 {
            return Err(AuditError::InvalidConfig {
                detail: "max_display must be at least 1".into(),
            });
        }
        if self.export_file_name.trim().is_empty() {
            return Err(AuditError::InvalidConfig {
                detail: "export_file_name is empty".into(),
            });
        }
        self.default_filters.validate().map_err(|e| AuditError::InvalidConfig {
            detail: format!("default_filters: {e}"),
        })
    }
}

//! CSV work order for distributing the queue to auditors.
//!
//! One row per queued case, in queue order. The case id column carries the
//! repository identifier unchanged so every row traces back to its case.

use crate::{error::AuditResult, queue::QueueTable};
use std::io::Write;

const FIXED_COLUMNS: [&str; 4] = ["case_id", "risk_tier", "risk_score", "ground_truth_label"];

pub fn write_csv<W: Write>(table: &QueueTable, out: &mut W) -> AuditResult<()> {
    let header: Vec<String> = FIXED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(table.feature_columns.iter().cloned())
        .collect();
    write_record(out, &header)?;

    for row in &table.rows {
        let mut fields = vec![
            row.case_id.clone(),
            row.tier.label().to_string(),
            row.score.to_string(),
            row.label.to_string(),
        ];
        fields.extend(row.features.iter().map(|v| v.to_string()));
        write_record(out, &fields)?;
    }
    Ok(())
}

pub fn to_csv_string(table: &QueueTable) -> AuditResult<String> {
    let mut buf = Vec::new();
    write_csv(table, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn write_record<W: Write>(out: &mut W, fields: &[String]) -> AuditResult<()> {
    let line: Vec<String> = fields.iter().map(|f| escape(f)).collect();
    writeln!(out, "{}", line.join(","))?;
    Ok(())
}

/// Quote a field when it holds a delimiter, a quote or a line break.
fn escape(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

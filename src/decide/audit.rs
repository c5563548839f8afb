//! JSON audit report for a decision pass.

use crate::domain::DecisionReport;
use anyhow::Result;
use serde_json::{json, Map, Value};
use std::path::Path;

pub const AUDIT_SCHEMA_VERSION: &str = "1.0";

pub fn audit_value(report: &DecisionReport, root_path: &Path) -> Result<Value> {
    let counts_by_outcome: Map<String, Value> = report
        .counts_by_outcome()
        .into_iter()
        .map(|(outcome, n)| (outcome.as_str().to_string(), json!(n)))
        .collect();
    let counts_by_reason: Map<String, Value> = report
        .counts_by_reason()
        .into_iter()
        .map(|(reason, n)| (reason.as_str().to_string(), json!(n)))
        .collect();

    let decisions = report
        .decisions()
        .map(|d| {
            json!({
                "path": d.path(),
                "kind": d.kind(),
                "outcome": d.outcome(),
                "reason": d.reason(),
                "reasoning": d.reasoning(),
                "metadata": d.metadata(),
            })
        })
        .collect::<Vec<_>>();
    let deletions = report
        .deletions()
        .map(|d| {
            json!({
                "path": d.path(),
                "kind": d.kind(),
                "outcome": d.outcome(),
                "reason": d.reason(),
                "reasoning": d.reasoning(),
                "artifact_path": d.artifact_path().display().to_string(),
                "is_safe_to_delete": d.is_safe_to_delete(),
                "backup_recommended": d.backup_recommended(),
            })
        })
        .collect::<Vec<_>>();

    let mut audit = Map::new();
    audit.insert("schema_version".to_string(), Value::String(AUDIT_SCHEMA_VERSION.to_string()));
    audit.insert("root".to_string(), Value::String(root_path.display().to_string()));
    audit.insert("mode".to_string(), Value::String(report.mode().to_string()));
    audit.insert("generated_at".to_string(), Value::String(report.generated_at().to_rfc3339()));
    audit.insert("counts_by_outcome".to_string(), Value::Object(counts_by_outcome));
    audit.insert("counts_by_reason".to_string(), Value::Object(counts_by_reason));
    audit.insert(
        "sets".to_string(),
        json!({
            "files_to_rebuild": report.files_to_rebuild(),
            "files_to_delete": report.files_to_delete(),
            "directories_to_create": report.directories_to_create(),
            "directories_to_rebuild": report.directories_to_rebuild(),
            "directories_to_delete": report.directories_to_delete(),
        }),
    );
    audit.insert("decisions".to_string(), Value::Array(decisions));
    if !deletions.is_empty() {
        audit.insert("deletions".to_string(), Value::Array(deletions));
    }
    audit.insert("errors".to_string(), serde_json::to_value(report.errors())?);
    Ok(Value::Object(audit))
}

pub fn render_audit(report: &DecisionReport, root_path: &Path) -> Result<String> {
    Ok(serde_json::to_string_pretty(&audit_value(report, root_path)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        DecisionOutcome, DecisionReason, DeletionDecision, IndexingMode, PathKind, RebuildDecision,
    };
    use chrono::Utc;

    #[test]
    fn audit_lists_counts_and_deletions() {
        let now = Utc::now();
        let mut report = DecisionReport::new(IndexingMode::Incremental, now);
        report.insert_rebuild(RebuildDecision::new(
            "a.py",
            PathKind::File,
            DecisionOutcome::Rebuild,
            DecisionReason::NewSource,
            "no artifact exists",
            now,
        ));
        report.insert_deletion(DeletionDecision::new(
            "old.py",
            PathKind::File,
            DecisionReason::SourceDeleted,
            "source no longer exists",
            now,
            "/k/old.py.kb.md",
        ));

        let value = audit_value(&report, Path::new("/repo")).unwrap();
        assert_eq!(value["schema_version"], AUDIT_SCHEMA_VERSION);
        assert_eq!(value["mode"], "incremental");
        assert_eq!(value["counts_by_outcome"]["REBUILD"], 1);
        assert_eq!(value["counts_by_outcome"]["DELETE"], 1);
        assert_eq!(value["decisions"][0]["reason"], "NEW_SOURCE");
        assert_eq!(value["deletions"][0]["is_safe_to_delete"], true);
        assert_eq!(value["sets"]["files_to_delete"][0], "old.py");
    }

    #[test]
    fn empty_report_omits_deletions() {
        let report = DecisionReport::new(IndexingMode::Full, Utc::now());
        let value = audit_value(&report, Path::new("/repo")).unwrap();
        assert!(value.get("deletions").is_none());
        assert_eq!(value["errors"], json!([]));
    }
}

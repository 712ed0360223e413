//! Staged edits: snapshot, edit, validate, restore on failure
//!
//! Every mutation of a config file runs as a transaction against a working
//! tree: the original content is snapshotted before anything is written, the
//! edited document is re-serialized and validated against the schema, and any
//! failure after the write restores the snapshot byte-for-byte.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::ConfigResult;
use crate::evaluator::ConfigEvaluator;
use crate::tree::ConfigDocument;

/// Apply `edit` to the document at `root/relative`, then validate the whole
/// tree. On validation failure the original file content is restored and the
/// validation error is returned. The edit closure runs against the parsed
/// document only; nothing touches disk unless parsing succeeds.
pub async fn apply_validated_edit<F>(
    root: &Path,
    relative: &Path,
    evaluator: &dyn ConfigEvaluator,
    edit: F,
) -> ConfigResult<ConfigDocument>
where
    F: FnOnce(&mut ConfigDocument) -> ConfigResult<()>,
{
    let disk_path = root.join(relative);
    let original = fs::read_to_string(&disk_path)?;
    let mut document = ConfigDocument::parse(&original)?;
    edit(&mut document)?;

    fs::write(&disk_path, document.to_pretty_string())?;
    match evaluator.validate(root).await {
        Ok(()) => Ok(document),
        Err(err) => {
            warn!(
                path = %relative.display(),
                error = %err,
                "validation failed after edit; restoring snapshot"
            );
            fs::write(&disk_path, &original)?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::StaticEvaluator;
    use crate::tree::ConfigPath;
    use serde_json::json;

    fn write_doc(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn test_validated_edit_applies_and_serializes() {
        let dir = tempfile::tempdir().unwrap();
        write_doc(dir.path(), "apps.json", "{\"exampleApp\":{\"replicas\":1}}");
        let evaluator = StaticEvaluator::new();

        let doc = apply_validated_edit(
            dir.path(),
            Path::new("apps.json"),
            &evaluator,
            |doc| doc.set(&ConfigPath::parse("exampleApp.replicas").unwrap(), json!(3)),
        )
        .await
        .unwrap();

        assert_eq!(
            doc.get(&ConfigPath::parse("exampleApp.replicas").unwrap()),
            Some(&json!(3))
        );
        let on_disk = fs::read_to_string(dir.path().join("apps.json")).unwrap();
        assert!(on_disk.contains("\"replicas\": 3"));
        assert!(on_disk.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_validation_failure_restores_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let original = "{\"exampleApp\":{\"replicas\":1}}";
        write_doc(dir.path(), "apps.json", original);
        let evaluator = StaticEvaluator::new();
        evaluator.fail_validation("replicas: conflicting values");

        let err = apply_validated_edit(
            dir.path(),
            Path::new("apps.json"),
            &evaluator,
            |doc| doc.set(&ConfigPath::parse("exampleApp.replicas").unwrap(), json!(-1)),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("conflicting values"));
        // byte-for-byte restore of the pre-edit content
        let on_disk = fs::read_to_string(dir.path().join("apps.json")).unwrap();
        assert_eq!(on_disk, original);
    }

    #[tokio::test]
    async fn test_failed_edit_closure_leaves_disk_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let original = "{\"exampleApp\":{\"replicas\":1}}";
        write_doc(dir.path(), "apps.json", original);
        let evaluator = StaticEvaluator::new();

        let result = apply_validated_edit(
            dir.path(),
            Path::new("apps.json"),
            &evaluator,
            |doc| {
                // descending through a scalar fails before any write
                doc.set(&ConfigPath::parse("exampleApp.replicas.deep").unwrap(), json!(1))
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(
            fs::read_to_string(dir.path().join("apps.json")).unwrap(),
            original
        );
    }

    #[tokio::test]
    async fn test_unparseable_document_fails_before_write() {
        let dir = tempfile::tempdir().unwrap();
        write_doc(dir.path(), "apps.json", "not json at all");
        let evaluator = StaticEvaluator::new();

        let result =
            apply_validated_edit(dir.path(), Path::new("apps.json"), &evaluator, |_| Ok(()))
                .await;

        assert!(result.is_err());
        assert_eq!(
            fs::read_to_string(dir.path().join("apps.json")).unwrap(),
            "not json at all"
        );
    }
}

use super::{failure_payload, JobStrategy, StrategyContext, StrategyError};
use crate::collaborator::{CollaboratorError, ImportRequest, SubTaskStatus, TaskId};
use crate::monitor::MonitorReport;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// A single importer sub-task; progress follows its item counts.
pub struct ImportStrategy;

#[async_trait]
impl JobStrategy for ImportStrategy {
    async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<Value, StrategyError> {
        let importer = ctx
            .collaborators
            .importer
            .as_ref()
            .ok_or(StrategyError::MissingCollaborator("import"))?;
        let params = ctx.parameters;
        let source_type = params.str_param("source_type").map_err(StrategyError::InvalidParameter)?;
        let source_path = params.str_param("source_path").map_err(StrategyError::InvalidParameter)?;
        let options = match params.get("options") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(StrategyError::InvalidParameter(format!(
                    "parameter 'options' must be an object (got {other})"
                )))
            }
        };

        let id = importer
            .add_task(ImportRequest {
                source_type: source_type.to_string(),
                source_path: source_path.to_string(),
                options,
            })
            .await?;
        let report = ctx
            .monitor
            .wait(importer.as_ref(), std::slice::from_ref(&id), ctx.progress, ctx.cancel)
            .await?;
        let status = single_status(&report, &id)?;

        Ok(json!({
            "source_type": source_type,
            "source_path": source_path,
            "items_processed": status.items_processed,
            "items_succeeded": status.items_succeeded,
            "items_failed": status.items_failed,
            "failures": failure_payload(&status.failed_items),
        }))
    }
}

/// Status of a one-handle batch; a failed sub-task fails the job.
pub(super) fn single_status(report: &MonitorReport, id: &TaskId) -> Result<SubTaskStatus, StrategyError> {
    let status = report
        .statuses
        .get(id)
        .cloned()
        .ok_or_else(|| CollaboratorError::UnknownTask(id.clone()))?;
    if !status.state.is_success() {
        let reason = status
            .error
            .clone()
            .unwrap_or_else(|| format!("sub-task {id} ended {:?}", status.state));
        return Err(CollaboratorError::Failed(reason).into());
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Harness, InstantSystem};
    use super::*;
    use crate::collaborator::Collaborators;
    use crate::job::JobParameters;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_item_counts_become_progress() {
        let importer = Arc::new(InstantSystem {
            items_per_task: 120,
            ..InstantSystem::default()
        });
        let harness = Harness::new(
            JobParameters::new()
                .with("source_type", "csv")
                .with("source_path", "/data/refs.csv")
                .with("options", json!({ "delimiter": ";" })),
            Collaborators::new().with_importer(importer.clone()),
        );

        let result = ImportStrategy.execute(&harness.ctx()).await.unwrap();

        assert_eq!(result["items_succeeded"], 120);
        assert_eq!(importer.requests(), vec!["/data/refs.csv"]);
        let progress = harness.progress.snapshot();
        assert_eq!(progress.total_items, 120);
        assert_eq!(progress.processed_items, 120);
    }

    #[tokio::test]
    async fn test_empty_import_keeps_counted_progress() {
        let importer = Arc::new(InstantSystem::default());
        let harness = Harness::new(
            JobParameters::new()
                .with("source_type", "csv")
                .with("source_path", "/data/empty.csv"),
            Collaborators::new().with_importer(importer),
        );

        let result = ImportStrategy.execute(&harness.ctx()).await.unwrap();

        assert_eq!(result["items_processed"], 0);
        let progress = harness.progress.snapshot();
        assert_eq!(progress.total_items, 1);
        assert_eq!(progress.processed_items, 1);
        assert_eq!(progress.progress_percent, 100.0);
    }

    #[tokio::test]
    async fn test_failed_import_fails_job() {
        let importer = Arc::new(InstantSystem::failing(&["/bad.csv"]));
        let harness = Harness::new(
            JobParameters::new()
                .with("source_type", "csv")
                .with("source_path", "/bad.csv"),
            Collaborators::new().with_importer(importer),
        );
        let err = ImportStrategy.execute(&harness.ctx()).await.unwrap_err();
        assert!(err.to_string().contains("could not be processed"));
    }

    #[tokio::test]
    async fn test_options_must_be_an_object() {
        let harness = Harness::new(
            JobParameters::new()
                .with("source_type", "csv")
                .with("source_path", "/data.csv")
                .with("options", "fast"),
            Collaborators::new().with_importer(Arc::new(InstantSystem::default())),
        );
        let err = ImportStrategy.execute(&harness.ctx()).await.unwrap_err();
        assert!(matches!(err, StrategyError::InvalidParameter(_)));
    }
}

use super::import::single_status;
use super::{failure_payload, JobStrategy, StrategyContext, StrategyError};
use crate::collaborator::ExportRequest;
use async_trait::async_trait;
use serde_json::{json, Value};

/// A single exporter sub-task
pub struct ExportStrategy;

#[async_trait]
impl JobStrategy for ExportStrategy {
    async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<Value, StrategyError> {
        let exporter = ctx
            .collaborators
            .exporter
            .as_ref()
            .ok_or(StrategyError::MissingCollaborator("export"))?;
        let params = ctx.parameters;
        let format = params.str_param("format").map_err(StrategyError::InvalidParameter)?;
        let output_path = params.str_param("output_path").map_err(StrategyError::InvalidParameter)?;
        let filter = params.get("filter").filter(|v| !v.is_null()).cloned();

        let id = exporter
            .add_task(ExportRequest {
                format: format.to_string(),
                output_path: output_path.to_string(),
                filter,
            })
            .await?;
        let report = ctx
            .monitor
            .wait(exporter.as_ref(), std::slice::from_ref(&id), ctx.progress, ctx.cancel)
            .await?;
        let status = single_status(&report, &id)?;

        Ok(json!({
            "format": format,
            "output_path": output_path,
            "items_exported": status.items_succeeded,
            "items_failed": status.items_failed,
            "failures": failure_payload(&status.failed_items),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Harness, InstantSystem};
    use super::*;
    use crate::collaborator::Collaborators;
    use crate::job::JobParameters;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_export_result() {
        let exporter = Arc::new(InstantSystem {
            items_per_task: 7,
            ..InstantSystem::default()
        });
        let harness = Harness::new(
            JobParameters::new()
                .with("format", "json")
                .with("output_path", "/tmp/out.json")
                .with("filter", json!({ "year": 2024 })),
            Collaborators::new().with_exporter(exporter.clone()),
        );

        let result = ExportStrategy.execute(&harness.ctx()).await.unwrap();

        assert_eq!(result["items_exported"], 7);
        assert_eq!(result["format"], "json");
        assert_eq!(exporter.requests(), vec!["/tmp/out.json"]);
    }
}

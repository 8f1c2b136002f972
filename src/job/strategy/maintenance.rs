use super::{JobStrategy, StrategyContext, StrategyError};
use crate::collaborator::MaintenanceOperation;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

/// Runs one maintenance operation directly
pub struct MaintenanceStrategy;

#[async_trait]
impl JobStrategy for MaintenanceStrategy {
    async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<Value, StrategyError> {
        let maintenance = ctx
            .collaborators
            .maintenance
            .as_ref()
            .ok_or(StrategyError::MissingCollaborator("maintenance"))?;
        let operation: MaintenanceOperation = ctx
            .parameters
            .str_param("operation")
            .map_err(StrategyError::InvalidParameter)?
            .parse()
            .map_err(StrategyError::InvalidParameter)?;

        ctx.progress.add_total(1);
        info!(%operation, "Running maintenance operation");
        match maintenance.run_operation(operation).await {
            Ok(details) => {
                ctx.progress.record(1, 0);
                Ok(json!({ "operation": operation.as_str(), "details": details }))
            }
            Err(e) => {
                ctx.progress.record(0, 1);
                Err(e.into())
            }
        }
    }
}

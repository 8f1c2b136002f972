use super::{JobStrategy, StrategyContext, StrategyError};
use async_trait::async_trait;
use serde_json::Value;

/// Delegates to the handler registered under the kind's name
pub struct CustomStrategy {
    name: String,
}

impl CustomStrategy {
    /// Strategy for the named custom kind
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl JobStrategy for CustomStrategy {
    async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<Value, StrategyError> {
        let handler = ctx
            .collaborators
            .custom
            .get(&self.name)
            .ok_or_else(|| StrategyError::UnknownHandler(self.name.clone()))?;
        Ok(handler.run(ctx.parameters, ctx.progress).await?)
    }
}

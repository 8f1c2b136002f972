use super::{ensure_not_all_failed, failed_keys, failure_payload, JobStrategy, StrategyContext, StrategyError};
use crate::collaborator::{OcrProcessor, OcrRequest, TaskId};
use crate::monitor::{MonitorError, MonitorReport};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

/// One OCR sub-task per document
pub struct OcrStrategy;

#[async_trait]
impl JobStrategy for OcrStrategy {
    async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<Value, StrategyError> {
        let ocr = ctx
            .collaborators
            .ocr
            .as_ref()
            .ok_or(StrategyError::MissingCollaborator("ocr"))?;
        let document_ids = ctx
            .parameters
            .string_list("document_ids")
            .map_err(StrategyError::InvalidParameter)?;

        let (report, handles) = run_ocr_phase(ocr.as_ref(), &document_ids, ctx).await?;
        ensure_not_all_failed(&report)?;

        let failed = failed_keys(&report, &handles);
        Ok(json!({
            "documents": document_ids.len(),
            "succeeded": report.succeeded,
            "failed": report.failed,
            "failures": failure_payload(&failed),
        }))
    }
}

/// Queue and monitor OCR for `document_ids`.
///
/// # Returns
/// The monitor report and `(document_id, handle)` pairs in submission order
pub(super) async fn run_ocr_phase(
    ocr: &dyn OcrProcessor,
    document_ids: &[String],
    ctx: &StrategyContext<'_>,
) -> Result<(MonitorReport, Vec<(String, TaskId)>), StrategyError> {
    let language = ctx.parameters.opt_str("language").map(str::to_string);

    let mut handles = Vec::with_capacity(document_ids.len());
    for document_id in document_ids {
        if ctx.cancel.is_shutdown_requested() {
            return Err(MonitorError::Canceled.into());
        }
        let id = ocr
            .add_task(OcrRequest {
                document_id: document_id.clone(),
                language: language.clone(),
            })
            .await?;
        handles.push((document_id.clone(), id));
    }
    info!(documents = handles.len(), "OCR sub-tasks queued");

    let ids: Vec<TaskId> = handles.iter().map(|(_, id)| id.clone()).collect();
    let report = ctx.monitor.wait(ocr, &ids, ctx.progress, ctx.cancel).await?;
    Ok((report, handles))
}

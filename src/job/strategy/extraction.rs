use super::ocr::run_ocr_phase;
use super::{ensure_not_all_failed, failed_keys, failure_payload, JobStrategy, StrategyContext, StrategyError};
use crate::collaborator::{ExtractionRequest, TaskId};
use crate::monitor::MonitorError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{info, warn};

/// Entity extraction, optionally preceded by an OCR phase.
///
/// With `run_ocr_first`, documents whose OCR failed are not extracted and
/// count as failures of the job.
pub struct EntityExtractionStrategy;

#[async_trait]
impl JobStrategy for EntityExtractionStrategy {
    async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<Value, StrategyError> {
        let extractor = ctx
            .collaborators
            .extractor
            .as_ref()
            .ok_or(StrategyError::MissingCollaborator("entity extraction"))?;
        let document_ids = ctx
            .parameters
            .string_list("document_ids")
            .map_err(StrategyError::InvalidParameter)?;
        let entity_types = ctx
            .parameters
            .string_list("entity_types")
            .map_err(StrategyError::InvalidParameter)?;

        let mut failed: Vec<String> = Vec::new();
        let mut ocr_summary = Value::Null;
        let mut to_extract = document_ids.clone();

        if ctx.parameters.bool_param("run_ocr_first") {
            let ocr = ctx
                .collaborators
                .ocr
                .as_ref()
                .ok_or(StrategyError::MissingCollaborator("ocr"))?;
            let (report, handles) = run_ocr_phase(ocr.as_ref(), &document_ids, ctx).await?;
            ensure_not_all_failed(&report)?;

            let ocr_failed = failed_keys(&report, &handles);
            if !ocr_failed.is_empty() {
                warn!(count = ocr_failed.len(), "Skipping extraction for documents that failed OCR");
            }
            let skip: HashSet<&String> = ocr_failed.iter().collect();
            to_extract.retain(|d| !skip.contains(d));
            ocr_summary = json!({ "succeeded": report.succeeded, "failed": report.failed });
            failed.extend(ocr_failed);
        }

        let mut handles = Vec::with_capacity(to_extract.len());
        for document_id in &to_extract {
            if ctx.cancel.is_shutdown_requested() {
                return Err(MonitorError::Canceled.into());
            }
            let id = extractor
                .add_task(ExtractionRequest {
                    document_id: document_id.clone(),
                    entity_types: entity_types.clone(),
                })
                .await?;
            handles.push((document_id.clone(), id));
        }
        info!(documents = handles.len(), "Extraction sub-tasks queued");

        let ids: Vec<TaskId> = handles.iter().map(|(_, id)| id.clone()).collect();
        let report = ctx.monitor.wait(extractor.as_ref(), &ids, ctx.progress, ctx.cancel).await?;
        ensure_not_all_failed(&report)?;
        failed.extend(failed_keys(&report, &handles));

        Ok(json!({
            "documents": document_ids.len(),
            "ocr": ocr_summary,
            "extracted": report.succeeded,
            "failed": failed.len(),
            "failures": failure_payload(&failed),
        }))
    }
}

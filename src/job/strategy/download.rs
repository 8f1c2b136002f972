use super::{ensure_not_all_failed, failure_payload, JobStrategy, StrategyContext, StrategyError};
use crate::collaborator::{DownloadRequest, TaskId};
use crate::downloader::split_by_year;
use crate::job::JobParameters;
use crate::monitor::MonitorError;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use serde_json::{json, Value};
use tracing::info;

/// One downloader sub-task per calendar year of the requested range
pub struct DownloadStrategy;

/// Dates to download, grouped by year.
///
/// `start_date`/`end_date` win over `year`; with neither, the current
/// year is used. The range never extends past `today`, so future dates
/// are not recorded as absent.
pub fn plan_periods(
    params: &JobParameters,
    today: NaiveDate,
) -> Result<Vec<(i32, Vec<NaiveDate>)>, String> {
    let start = params.date_param("start_date")?;
    let end = params.date_param("end_date")?;

    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        (Some(start), None) => (start, today),
        (None, Some(end)) => (year_start(end.year())?, end),
        (None, None) => {
            let year = params.year_param()?.unwrap_or(today.year());
            (year_start(year)?, year_end(year)?)
        }
    };
    let end = end.min(today);
    if start > end {
        return Err(format!("nothing to download: {start} is after {end}"));
    }
    Ok(split_by_year(start, end))
}

fn year_start(year: i32) -> Result<NaiveDate, String> {
    NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(|| format!("invalid year {year}"))
}

fn year_end(year: i32) -> Result<NaiveDate, String> {
    NaiveDate::from_ymd_opt(year, 12, 31).ok_or_else(|| format!("invalid year {year}"))
}

#[async_trait]
impl JobStrategy for DownloadStrategy {
    async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<Value, StrategyError> {
        let downloader = ctx
            .collaborators
            .downloader
            .as_ref()
            .ok_or(StrategyError::MissingCollaborator("download"))?;
        let source_id = ctx
            .parameters
            .str_param("source_id")
            .map_err(StrategyError::InvalidParameter)?;
        let periods = plan_periods(ctx.parameters, Utc::now().date_naive())
            .map_err(StrategyError::InvalidParameter)?;
        let total_dates: u64 = periods.iter().map(|(_, dates)| dates.len() as u64).sum();

        downloader.start().await?;

        let mut handles: Vec<(String, TaskId)> = Vec::with_capacity(periods.len());
        for (year, dates) in periods {
            if ctx.cancel.is_shutdown_requested() {
                return Err(MonitorError::Canceled.into());
            }
            let period = year.to_string();
            let id = downloader
                .add_task(DownloadRequest {
                    source_id: source_id.to_string(),
                    period: period.clone(),
                    dates,
                    cancel: Some(ctx.cancel.clone()),
                })
                .await?;
            handles.push((period, id));
        }
        info!(
            job_id = ctx.job_id,
            source_id,
            periods = handles.len(),
            dates = total_dates,
            "Download sub-tasks queued"
        );

        let ids: Vec<TaskId> = handles.iter().map(|(_, id)| id.clone()).collect();
        let report = ctx
            .monitor
            .wait_expecting(downloader.as_ref(), &ids, total_dates, ctx.progress, ctx.cancel)
            .await?;
        ensure_not_all_failed(&report)?;

        let mut succeeded = 0;
        let mut failed = 0;
        let mut failed_items = Vec::new();
        let mut per_period = Vec::with_capacity(handles.len());
        for (period, id) in &handles {
            let Some(status) = report.statuses.get(id) else { continue };
            succeeded += status.items_succeeded;
            failed += status.items_failed;
            failed_items.extend(status.failed_items.iter().cloned());
            per_period.push(json!({
                "period": period,
                "task_id": id,
                "state": status.state,
                "items_processed": status.items_processed,
                "items_succeeded": status.items_succeeded,
                "items_failed": status.items_failed,
                "error": status.error,
            }));
        }

        Ok(json!({
            "source_id": source_id,
            "periods": per_period,
            "items_processed": succeeded + failed,
            "items_succeeded": succeeded,
            "items_failed": failed,
            "failures": failure_payload(&failed_items),
        }))
    }
}

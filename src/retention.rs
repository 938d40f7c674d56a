use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{CatalogClient, DatasetQuery};
use crate::error::SptError;
use crate::identity::parse_dataset_date;
use crate::manager::DatasetManager;

pub const RETENTION_PAGE_SIZE: usize = 1000;
const FORECAST_DATE_ASC: &str = "forecast_date asc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionScope {
    Model,
    Subbasin { watershed: String, subbasin: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
    pub stopped_at: Option<String>,
}

impl<C: CatalogClient> DatasetManager<C> {
    pub fn purge_older_than(
        &self,
        days: u32,
        scope: &RetentionScope,
        now: NaiveDateTime,
    ) -> Result<RetentionReport, SptError> {
        let prefix = match scope {
            RetentionScope::Model => self.strategy().dataset_prefix(None),
            RetentionScope::Subbasin {
                watershed,
                subbasin,
            } => self
                .strategy()
                .dataset_prefix(Some((watershed.as_str(), subbasin.as_str()))),
        };
        let Some(cutoff) = TimeDelta::try_days(i64::from(days))
            .and_then(|window| now.checked_sub_signed(window))
        else {
            info!(prefix = %prefix, days, "retention window reaches past the calendar");
            return Ok(RetentionReport::default());
        };
        let total = self
            .catalog()
            .search_datasets(&DatasetQuery::prefix(&prefix).rows(1))?
            .count;
        info!(prefix = %prefix, total, %cutoff, "sweeping old datasets");

        let mut report = RetentionReport::default();
        // Deleted datasets drop out of the result set; only the ones left
        // behind shift the next page.
        'pages: for _ in 0..total / RETENTION_PAGE_SIZE + 1 {
            let query = DatasetQuery::prefix(&prefix)
                .rows(RETENTION_PAGE_SIZE)
                .start(report.failed.len())
                .sort(FORECAST_DATE_ASC);
            let page = self.catalog().search_datasets(&query)?;
            if page.results.is_empty() {
                break;
            }
            for dataset in page.results {
                let dataset_date = match parse_dataset_date(&dataset.name) {
                    Ok(date) => date,
                    Err(err) => {
                        warn!(dataset = %dataset.name, error = %err, "unreadable dataset date");
                        report.failed.push(dataset.name);
                        continue;
                    }
                };
                if dataset_date >= cutoff {
                    report.stopped_at = Some(dataset.name);
                    break 'pages;
                }
                match self.catalog().delete_dataset(&dataset.id) {
                    Ok(()) => {
                        info!(dataset = %dataset.name, id = %dataset.id, "dataset deleted");
                        report.deleted.push(dataset.name);
                    }
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        warn!(dataset = %dataset.name, error = %err, "dataset delete failed");
                        report.failed.push(dataset.name);
                    }
                }
            }
        }
        info!(
            deleted = report.deleted.len(),
            "remember to purge deleted datasets from the CKAN admin panel"
        );
        Ok(report)
    }
}

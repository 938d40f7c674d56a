use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::archive::{self, ResourceFormat};
use crate::catalog::{CatalogClient, CatalogDataset, CatalogResource};
use crate::error::{SptError, tolerate};
use crate::identity::{ResourceVariant, RunContext, is_warning_points_name, return_period_from_name};
use crate::manager::DatasetManager;

pub const READY_RESOURCE_COUNT: usize = 52;
pub const WARNING_POINT_SET: usize = 3;
pub const WRF_LOOKBACK_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "count", rename_all = "snake_case")]
pub enum FetchOutcome {
    AlreadyPresent,
    NotFound,
    Fetched(usize),
}

impl FetchOutcome {
    pub fn is_available(&self) -> bool {
        match self {
            FetchOutcome::AlreadyPresent => true,
            FetchOutcome::NotFound => false,
            FetchOutcome::Fetched(count) => *count > 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_cycles: usize,
    pub spacing: TimeDelta,
    pub stale_after: TimeDelta,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_cycles: 12,
            spacing: TimeDelta::hours(12),
            stale_after: TimeDelta::hours(24),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastCycle {
    pub date_string: String,
    pub age: TimeDelta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentDownload {
    pub date_string: String,
    pub target_dir: PathBuf,
    pub outcome: FetchOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarningPointsDownload {
    pub forecast_date: NaiveDateTime,
    pub files: Vec<PathBuf>,
}

pub fn is_ready(resource_count: usize, forecast_count: usize, warning_count: usize) -> bool {
    resource_count >= READY_RESOURCE_COUNT
        && forecast_count >= READY_RESOURCE_COUNT
        && (warning_count == 0 || warning_count == WARNING_POINT_SET)
}

pub fn classify_readiness(dataset: &CatalogDataset) -> Readiness {
    let resource_count = dataset.num_resources.max(dataset.resources.len());
    let warning_count = dataset
        .resources
        .iter()
        .filter(|resource| is_warning_points_name(&resource.name))
        .count();
    let forecast_count = dataset.resources.len() - warning_count;
    if is_ready(resource_count, forecast_count, warning_count) {
        Readiness::Ready
    } else {
        Readiness::Incomplete
    }
}

pub fn accept_cycle(readiness: Readiness, age: TimeDelta, policy: &PollPolicy) -> bool {
    readiness == Readiness::Ready || age >= policy.stale_after
}

pub fn ensemble_cycles(now: NaiveDateTime, policy: &PollPolicy) -> Vec<ForecastCycle> {
    (0..policy.max_cycles)
        .map_while(|step| {
            let age = policy.spacing.checked_mul(i32::try_from(step).ok()?)?;
            let instant = now.checked_sub_signed(age)?;
            let hour = if instant.hour() > 11 { "1200" } else { "0" };
            Some(ForecastCycle {
                date_string: format!("{}.{hour}", instant.format("%Y%m%d")),
                age,
            })
        })
        .collect()
}

impl<C: CatalogClient> DatasetManager<C> {
    pub fn fetch_resources(
        &self,
        resources: &[CatalogResource],
        target_dir: &Path,
        expected_local_name: Option<&str>,
    ) -> Result<FetchOutcome, SptError> {
        let check_location = match expected_local_name {
            Some(name) => target_dir.join(name),
            None => target_dir.to_path_buf(),
        };
        if check_location.exists() {
            info!(path = %check_location.display(), "resource exists locally, skipping");
            return Ok(FetchOutcome::AlreadyPresent);
        }

        fs::create_dir_all(target_dir).map_err(|err| {
            SptError::Filesystem(format!("create {}: {err}", target_dir.display()))
        })?;
        let mut fetched = 0usize;
        for resource in resources {
            match self.fetch_one(resource, target_dir) {
                Ok(true) => fetched += 1,
                Ok(false) => {}
                Err(err @ SptError::PathTraversal(_)) => {
                    error!(resource = %resource.name, error = %err, "rejected archive");
                }
                Err(err) => {
                    warn!(resource = %resource.name, error = %err, "download failed");
                }
            }
        }
        info!(target = %target_dir.display(), fetched, "finished downloading");
        Ok(FetchOutcome::Fetched(fetched))
    }

    fn fetch_one(&self, resource: &CatalogResource, target_dir: &Path) -> Result<bool, SptError> {
        let format = resource.resource_format();
        if let ResourceFormat::Other(other) = &format {
            warn!(resource = %resource.name, format = %other, "unsupported file format, skipping");
            return Ok(false);
        }
        // The temp file is removed on drop, after success or failure.
        let temp = tempfile::Builder::new()
            .prefix(&format!("{}.", resource.name))
            .suffix(&format!(".{}", format.extension()))
            .tempfile_in(target_dir)
            .map_err(|err| SptError::Filesystem(err.to_string()))?;
        debug!(resource = %resource.name, url = %resource.url, "downloading");
        self.catalog().download(&resource.url, temp.path())?;
        archive::extract_archive(temp.path(), &format, target_dir)?;
        Ok(true)
    }

    pub fn download_resource(
        &self,
        ctx: &RunContext,
        variant: Option<&ResourceVariant>,
        target_dir: &Path,
        local_file: Option<&str>,
    ) -> Result<FetchOutcome, SptError> {
        match self.resource_info(ctx, variant)? {
            Some(resource) => self.fetch_resources(&[resource], target_dir, local_file),
            None => {
                info!(resource = %self.resource_name(ctx, variant), "resource not found in catalog");
                Ok(FetchOutcome::NotFound)
            }
        }
    }

    pub fn download_prediction_resource(
        &self,
        watershed: &str,
        subbasin: &str,
        date_string: &str,
        target_dir: &Path,
    ) -> Result<FetchOutcome, SptError> {
        let ctx = self.context(watershed, subbasin, date_string)?;
        self.download_resource(&ctx, None, target_dir, None)
    }

    pub fn download_prediction_dataset(
        &self,
        ctx: &RunContext,
        root: &Path,
    ) -> Result<FetchOutcome, SptError> {
        if !root.is_dir() {
            warn!(root = %root.display(), "extract directory does not exist");
            return Ok(FetchOutcome::NotFound);
        }
        let Some(dataset) = self.dataset_info(ctx)? else {
            info!(dataset = %self.dataset_name(ctx), "prediction dataset not found");
            return Ok(FetchOutcome::NotFound);
        };
        self.fetch_resources(&dataset.resources, &root.join(ctx.date_string()), None)
    }

    pub fn download_recent_ensemble(
        &self,
        watershed: &str,
        subbasin: &str,
        root: &Path,
        now: NaiveDateTime,
        policy: &PollPolicy,
    ) -> Result<Option<RecentDownload>, SptError> {
        if !root.is_dir() {
            warn!(root = %root.display(), "extract directory does not exist");
            return Ok(None);
        }
        for cycle in ensemble_cycles(now, policy) {
            let ctx = self.context(watershed, subbasin, &cycle.date_string)?;
            let Some(dataset) = tolerate(self.dataset_info(&ctx), "dataset search")?.flatten()
            else {
                debug!(cycle = %cycle.date_string, "no dataset for cycle");
                continue;
            };
            let readiness = classify_readiness(&dataset);
            if !accept_cycle(readiness, cycle.age, policy) {
                debug!(cycle = %cycle.date_string, "cycle incomplete, trying older");
                continue;
            }
            let target_dir = root.join(ctx.basin_folder()).join(&cycle.date_string);
            let outcome = self.fetch_resources(&dataset.resources, &target_dir, None)?;
            return Ok(Some(RecentDownload {
                date_string: cycle.date_string,
                target_dir,
                outcome,
            }));
        }
        warn!(watershed, subbasin, "recent resources not found");
        Ok(None)
    }

    pub fn download_recent_warning_points(
        &self,
        watershed: &str,
        subbasin: &str,
        root: &Path,
        now: NaiveDateTime,
    ) -> Result<Option<WarningPointsDownload>, SptError> {
        if !root.is_dir() {
            warn!(root = %root.display(), "extract directory does not exist");
            return Ok(None);
        }
        for step in 0..2 {
            let instant = now - TimeDelta::hours(12 * step);
            let hour = if instant.hour() > 11 { 12 } else { 0 };
            let forecast_date = instant
                .date()
                .and_time(NaiveTime::MIN)
                .with_hour(hour)
                .unwrap_or(instant);
            let date_string = format!(
                "{}.{}",
                forecast_date.format("%Y%m%d"),
                if hour == 12 { "1200" } else { "0" }
            );
            let ctx = self.context(watershed, subbasin, &date_string)?;
            let Some(dataset) = tolerate(self.dataset_info(&ctx), "dataset search")?.flatten()
            else {
                continue;
            };
            let warning_points = if dataset.num_resources.max(dataset.resources.len())
                >= READY_RESOURCE_COUNT
            {
                dataset
                    .resources
                    .iter()
                    .filter(|resource| is_warning_points_name(&resource.name))
                    .collect::<Vec<_>>()
            } else {
                Vec::new()
            };
            if warning_points.len() != WARNING_POINT_SET {
                debug!(cycle = %date_string, found = warning_points.len(), "warning points incomplete");
                continue;
            }

            let target_dir = root.join(ctx.basin_folder()).join(&date_string);
            let mut files = Vec::new();
            for resource in warning_points {
                let Some(period) = return_period_from_name(&resource.name) else {
                    continue;
                };
                let local_name = format!("return_{period}_points.geojson");
                let outcome = self.fetch_resources(
                    std::slice::from_ref(resource),
                    &target_dir,
                    Some(&local_name),
                )?;
                if outcome.is_available() {
                    files.push(target_dir.join(&local_name));
                }
            }
            if !files.is_empty() {
                return Ok(Some(WarningPointsDownload {
                    forecast_date,
                    files,
                }));
            }
        }
        warn!(watershed, subbasin, "recent warning points not found");
        Ok(None)
    }

    pub fn download_recent_wrf(
        &self,
        watershed: &str,
        subbasin: &str,
        root: &Path,
        now: NaiveDateTime,
    ) -> Result<Option<RecentDownload>, SptError> {
        if !root.is_dir() {
            warn!(root = %root.display(), "extract directory does not exist");
            return Ok(None);
        }
        let top_of_hour = now
            .with_minute(0)
            .and_then(|time| time.with_second(0))
            .and_then(|time| time.with_nanosecond(0))
            .unwrap_or(now);
        for step in 0..WRF_LOOKBACK_HOURS {
            let instant = top_of_hour - TimeDelta::hours(step);
            let date_string = instant.format(self.strategy().date_format()).to_string();
            let ctx = self.context(watershed, subbasin, &date_string)?;
            let Some(resource) =
                tolerate(self.resource_info(&ctx, None), "resource search")?.flatten()
            else {
                continue;
            };
            let target_dir = root.join(ctx.basin_folder());
            let local_name = format!("RapidResult_{date_string}_CF.nc");
            let outcome = self.fetch_resources(&[resource], &target_dir, Some(&local_name))?;
            if outcome.is_available() {
                return Ok(Some(RecentDownload {
                    date_string,
                    target_dir,
                    outcome,
                }));
            }
        }
        warn!(watershed, subbasin, "recent resources not found");
        Ok(None)
    }

    pub fn download_model_resource(
        &self,
        resource: &CatalogResource,
        target_dir: &Path,
    ) -> Result<FetchOutcome, SptError> {
        debug!(
            watershed = resource.watershed().unwrap_or_default(),
            subbasin = resource.subbasin().unwrap_or_default(),
            "downloading model resource"
        );
        self.fetch_resources(std::slice::from_ref(resource), target_dir, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_warning_set_is_never_ready() {
        assert!(is_ready(52, 52, 0));
        assert!(is_ready(55, 52, 3));
        assert!(!is_ready(53, 52, 1));
        assert!(!is_ready(54, 52, 2));
        assert!(!is_ready(51, 51, 0));
    }

    #[test]
    fn stale_cycles_are_accepted() {
        let policy = PollPolicy::default();
        assert!(!accept_cycle(Readiness::Incomplete, TimeDelta::hours(12), &policy));
        assert!(accept_cycle(Readiness::Incomplete, TimeDelta::hours(24), &policy));
        assert!(accept_cycle(Readiness::Ready, TimeDelta::zero(), &policy));
    }

    #[test]
    fn cycles_step_back_twelve_hours() {
        let now = NaiveDateTime::parse_from_str("2016-07-11 15:30:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let cycles = ensemble_cycles(now, &PollPolicy::default());
        assert_eq!(cycles.len(), 12);
        assert_eq!(cycles[0].date_string, "20160711.1200");
        assert_eq!(cycles[1].date_string, "20160711.0");
        assert_eq!(cycles[2].date_string, "20160710.1200");
        assert_eq!(cycles[2].age, TimeDelta::hours(24));
    }

    #[test]
    fn cycles_stop_at_the_calendar_floor() {
        let now = NaiveDateTime::parse_from_str("2016-07-11 15:30:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let policy = PollPolicy {
            max_cycles: usize::MAX,
            spacing: TimeDelta::days(36_500),
            stale_after: TimeDelta::hours(24),
        };
        let cycles = ensemble_cycles(now, &policy);
        assert!(!cycles.is_empty());
        assert!(cycles.len() < 10_000);
        assert_eq!(cycles[0].date_string, "20160711.1200");
    }
}

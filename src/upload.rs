use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::{self, ResourceFormat};
use crate::catalog::{CatalogClient, CatalogResource, NewResource};
use crate::error::SptError;
use crate::identity::{ResourceVariant, RunContext, watershed_subbasin_from_folder};
use crate::manager::DatasetManager;

static ENSEMBLE_MEMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Qout_\w+_(\d+)\.nc").unwrap());
static RETURN_PERIOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"return_(\d+)_points\.geojson").unwrap());
static RAPID_NAMELIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"rapid_namelist_(\w+)\.dat").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Created(CatalogResource),
    Replaced(CatalogResource),
    AlreadyExists,
    Failed(String),
}

impl UploadOutcome {
    pub fn action(&self) -> &'static str {
        match self {
            UploadOutcome::Created(_) => "created",
            UploadOutcome::Replaced(_) => "replaced",
            UploadOutcome::AlreadyExists => "exists",
            UploadOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadItemResult {
    pub resource: String,
    pub action: String,
    pub resource_id: Option<String>,
    pub error: Option<String>,
}

impl UploadItemResult {
    fn from_outcome(resource: String, outcome: &UploadOutcome) -> Self {
        let (resource_id, error) = match outcome {
            UploadOutcome::Created(created) | UploadOutcome::Replaced(created) => {
                (Some(created.id.clone()), None)
            }
            UploadOutcome::AlreadyExists => (None, None),
            UploadOutcome::Failed(reason) => (None, Some(reason.clone())),
        };
        Self {
            resource,
            action: outcome.action().to_string(),
            resource_id,
            error,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadResult {
    pub items: Vec<UploadItemResult>,
}

impl UploadResult {
    pub fn failures(&self) -> usize {
        self.items.iter().filter(|item| item.is_failure()).count()
    }
}

impl<C: CatalogClient> DatasetManager<C> {
    pub fn upload_resource(
        &self,
        ctx: &RunContext,
        variant: Option<&ResourceVariant>,
        artifact: &Path,
        overwrite: bool,
        format: ResourceFormat,
    ) -> Result<UploadOutcome, SptError> {
        let name = self.resource_name(ctx, variant);
        let result = self.reconcile_upload(ctx, &name, artifact, overwrite, format);
        remove_artifact(artifact);
        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(resource = %name, error = %err, "upload failed");
                Ok(UploadOutcome::Failed(err.to_string()))
            }
        }
    }

    fn reconcile_upload(
        &self,
        ctx: &RunContext,
        name: &str,
        artifact: &Path,
        overwrite: bool,
        format: ResourceFormat,
    ) -> Result<UploadOutcome, SptError> {
        let dataset_id = self.ensure_dataset(ctx)?;
        let existing = self.find_resource(&dataset_id, name)?;

        if let Some(existing) = &existing {
            if !overwrite {
                info!(resource = %name, "resource exists, skipping");
                return Ok(UploadOutcome::AlreadyExists);
            }
            // resource_update cannot swap the uploaded file, so replace it.
            self.catalog().delete_resource(&existing.id)?;
            debug!(resource = %name, id = %existing.id, "existing resource deleted");
        }

        let request = NewResource {
            name: name.to_string(),
            format,
            watershed: ctx.watershed().to_string(),
            subbasin: ctx.subbasin().to_string(),
            forecast_date: ctx.date_string().to_string(),
            description: self.metadata().resource_description.clone(),
        };
        let created = self
            .catalog()
            .create_resource(&dataset_id, &request, artifact)?;
        info!(resource = %name, id = %created.id, "resource uploaded");
        Ok(match existing {
            Some(_) => UploadOutcome::Replaced(created),
            None => UploadOutcome::Created(created),
        })
    }

    pub fn zip_upload_file(
        &self,
        ctx: &RunContext,
        file: &Path,
        overwrite: bool,
    ) -> Result<UploadItemResult, SptError> {
        let output_dir = archive::parent_dir(file).to_path_buf();
        self.package_and_upload(ctx, None, overwrite, ResourceFormat::TarGz, |name| {
            archive::make_tarfile(file, &output_dir, name)
        })
    }

    pub fn zip_upload_directory(
        &self,
        ctx: &RunContext,
        directory: &Path,
        pattern: &str,
        overwrite: bool,
    ) -> Result<UploadItemResult, SptError> {
        self.package_and_upload(ctx, None, overwrite, ResourceFormat::TarGz, |name| {
            archive::make_directory_tarfile(directory, pattern, name)
        })
    }

    pub fn zip_upload_forecasts_in_directory(
        &self,
        ctx: &RunContext,
        directory: &Path,
    ) -> Result<UploadResult, SptError> {
        info!(watershed = ctx.watershed(), subbasin = ctx.subbasin(), "uploading forecasts");
        self.upload_variants(ctx, directory, "Qout_*.nc", &ENSEMBLE_MEMBER, |member| {
            ResourceVariant::EnsembleMember(member.to_string())
        })
    }

    pub fn zip_upload_warning_points_in_directory(
        &self,
        ctx: &RunContext,
        directory: &Path,
    ) -> Result<UploadResult, SptError> {
        info!(watershed = ctx.watershed(), subbasin = ctx.subbasin(), "uploading warning points");
        self.upload_variants(
            ctx,
            directory,
            "return_*_points.geojson",
            &RETURN_PERIOD,
            |period| ResourceVariant::WarningPoints(period.to_string()),
        )
    }

    pub fn zip_upload_ensemble_tree(&self, root: &Path) -> Result<UploadResult, SptError> {
        let mut result = UploadResult::default();
        for basin_dir in subdirectories(root)? {
            let Some(folder) = file_name_str(&basin_dir) else {
                continue;
            };
            let (watershed, subbasin) = match watershed_subbasin_from_folder(folder) {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(folder, error = %err, "skipping folder");
                    continue;
                }
            };
            for cycle_dir in subdirectories(&basin_dir)? {
                let Some(date_string) = file_name_str(&cycle_dir) else {
                    continue;
                };
                let ctx = match self.context(&watershed, &subbasin, date_string) {
                    Ok(ctx) => ctx,
                    Err(err) => {
                        warn!(folder = date_string, error = %err, "skipping forecast cycle");
                        continue;
                    }
                };
                let forecasts = self.zip_upload_forecasts_in_directory(&ctx, &cycle_dir)?;
                result.items.extend(forecasts.items);
                let warnings = self.zip_upload_warning_points_in_directory(&ctx, &cycle_dir)?;
                result.items.extend(warnings.items);
            }
        }
        info!(
            uploaded = result.items.len(),
            failed = result.failures(),
            "ensemble upload finished"
        );
        Ok(result)
    }

    pub fn zip_upload_wrf_resource(
        &self,
        source_file: &Path,
        watershed: &str,
        subbasin: &str,
    ) -> Result<UploadItemResult, SptError> {
        let file_name = file_name_str(source_file).unwrap_or_default();
        let date_string = file_name
            .split('_')
            .nth(1)
            .ok_or_else(|| SptError::InvalidDate {
                value: file_name.to_string(),
                format: self.strategy().date_format().to_string(),
            })?;
        let ctx = self.context(watershed, subbasin, date_string)?;
        self.zip_upload_file(&ctx, source_file, false)
    }

    pub fn zip_upload_rapid_input(
        &self,
        source_directory: &Path,
        now: NaiveDateTime,
    ) -> Result<Option<UploadItemResult>, SptError> {
        let namelists = archive::matching_entries(source_directory, "rapid_namelist_*.dat")?;
        let Some(subbasin) = namelists.iter().find_map(|path| {
            let name = file_name_str(path)?;
            RAPID_NAMELIST
                .captures(name)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        }) else {
            warn!(directory = %source_directory.display(), "no RAPID namelist found");
            return Ok(None);
        };
        let watershed = file_name_str(source_directory).unwrap_or_default();
        let ctx = self
            .strategy()
            .undated_context(watershed, &subbasin, now);
        self.zip_upload_directory(&ctx, source_directory, "*", false)
            .map(Some)
    }

    pub fn upload_model_resource(
        &self,
        upload_file: &Path,
        watershed: &str,
        subbasin: &str,
        now: NaiveDateTime,
    ) -> Result<UploadItemResult, SptError> {
        let ctx = self.strategy().undated_context(watershed, subbasin, now);
        let name = self.resource_name(&ctx, None);
        let outcome = self.upload_resource(&ctx, None, upload_file, true, ResourceFormat::Zip)?;
        Ok(UploadItemResult::from_outcome(name, &outcome))
    }

    fn upload_variants<F>(
        &self,
        ctx: &RunContext,
        directory: &Path,
        pattern: &str,
        regex: &Regex,
        make_variant: F,
    ) -> Result<UploadResult, SptError>
    where
        F: Fn(&str) -> ResourceVariant,
    {
        let output_dir = archive::parent_dir(directory).to_path_buf();
        let mut result = UploadResult::default();
        for file in archive::matching_entries(directory, pattern)? {
            let Some(id) = file_name_str(&file)
                .and_then(|name| regex.captures(name))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
            else {
                warn!(file = %file.display(), "file name does not carry a variant id, skipping");
                continue;
            };
            let variant = make_variant(&id);
            let item = self.package_and_upload(
                ctx,
                Some(&variant),
                false,
                ResourceFormat::TarGz,
                |name| archive::make_tarfile(&file, &output_dir, name),
            )?;
            result.items.push(item);
        }
        info!(count = result.items.len(), "datasets uploaded");
        Ok(result)
    }

    fn package_and_upload<F>(
        &self,
        ctx: &RunContext,
        variant: Option<&ResourceVariant>,
        overwrite: bool,
        format: ResourceFormat,
        package: F,
    ) -> Result<UploadItemResult, SptError>
    where
        F: FnOnce(&str) -> Result<PathBuf, SptError>,
    {
        let name = self.resource_name(ctx, variant);
        debug!(resource = %name, "packaging");
        let artifact = match package(&name) {
            Ok(path) => path,
            Err(err) => {
                warn!(resource = %name, error = %err, "packaging failed");
                let outcome = UploadOutcome::Failed(err.to_string());
                return Ok(UploadItemResult::from_outcome(name, &outcome));
            }
        };
        let outcome = self.upload_resource(ctx, variant, &artifact, overwrite, format)?;
        Ok(UploadItemResult::from_outcome(name, &outcome))
    }
}

fn remove_artifact(artifact: &Path) {
    if let Err(err) = fs::remove_file(artifact) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(artifact = %artifact.display(), error = %err, "failed to remove artifact");
        }
    }
}

fn subdirectories(root: &Path) -> Result<Vec<PathBuf>, SptError> {
    let entries = fs::read_dir(root)
        .map_err(|err| SptError::Filesystem(format!("read dir {}: {err}", root.display())))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SptError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn file_name_str(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}

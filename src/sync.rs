use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{CatalogClient, CatalogResource};
use crate::download::FetchOutcome;
use crate::error::{SptError, tolerate};
use crate::manager::DatasetManager;

pub fn refresh_window() -> TimeDelta {
    TimeDelta::hours(12) + TimeDelta::minutes(30)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMirror {
    pub watershed: String,
    pub subbasin: String,
    pub folder: Utf8PathBuf,
}

impl LocalMirror {
    pub fn from_folder(folder: Utf8PathBuf) -> Option<Self> {
        let name = folder.file_name()?;
        let (watershed, subbasin) = name.split_once('-').unwrap_or((name, ""));
        Some(Self {
            watershed: watershed.to_string(),
            subbasin: subbasin.to_string(),
            folder,
        })
    }

    fn matches(&self, resource: &CatalogResource) -> bool {
        match (resource.watershed(), resource.subbasin()) {
            (Some(watershed), Some(subbasin)) => {
                watershed.eq_ignore_ascii_case(&self.watershed)
                    && subbasin.eq_ignore_ascii_case(&self.subbasin)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Orphaned,
    Updated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan<'a> {
    pub removals: Vec<(&'a LocalMirror, RemovalReason)>,
    pub downloads: Vec<&'a CatalogResource>,
}

pub fn plan_sync<'a>(
    mirrors: &'a [LocalMirror],
    remote: &'a [CatalogResource],
    now: NaiveDateTime,
) -> SyncPlan<'a> {
    let remote: Vec<&CatalogResource> = remote
        .iter()
        .filter(|resource| resource.watershed().is_some() && resource.subbasin().is_some())
        .collect();
    let threshold = now - refresh_window();

    let mut removals = Vec::new();
    for mirror in mirrors {
        let Some(resource) = remote.iter().find(|resource| mirror.matches(resource)) else {
            removals.push((mirror, RemovalReason::Orphaned));
            continue;
        };
        match resource.created_at() {
            Some(created) if created > threshold => {
                removals.push((mirror, RemovalReason::Updated));
            }
            Some(_) => {}
            None => {
                warn!(
                    resource = %resource.name,
                    created = resource.created.as_deref().unwrap_or_default(),
                    "unreadable creation time, keeping local copy"
                );
            }
        }
    }

    SyncPlan {
        removals,
        downloads: remote,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub removed: Vec<RemovedMirror>,
    pub downloaded: Vec<SyncedResource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovedMirror {
    pub folder: Utf8PathBuf,
    pub reason: RemovalReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncedResource {
    pub resource: String,
    pub folder: Utf8PathBuf,
    pub outcome: Option<FetchOutcome>,
}

impl<C: CatalogClient> DatasetManager<C> {
    pub fn sync_rapid_input(
        &self,
        local_root: &Utf8Path,
        now: NaiveDateTime,
    ) -> Result<SyncReport, SptError> {
        let ctx = self.strategy().undated_context("", "", now);
        let dataset_name = self.dataset_name(&ctx);
        let Some(dataset) = self.find_dataset(&dataset_name)? else {
            warn!(dataset = %dataset_name, "RAPID input dataset not found");
            return Ok(SyncReport::default());
        };

        let mirrors = local_mirrors(local_root)?;
        let plan = plan_sync(&mirrors, &dataset.resources, now);
        let mut report = SyncReport::default();

        for (mirror, reason) in &plan.removals {
            info!(folder = %mirror.folder, ?reason, "removing local RAPID input");
            fs::remove_dir_all(&mirror.folder).map_err(|err| {
                SptError::Filesystem(format!("remove {}: {err}", mirror.folder))
            })?;
            report.removed.push(RemovedMirror {
                folder: mirror.folder.clone(),
                reason: *reason,
            });
        }

        for resource in plan.downloads {
            let folder = local_root.join(format!(
                "{}-{}",
                resource.watershed().unwrap_or_default().to_lowercase(),
                resource.subbasin().unwrap_or_default().to_lowercase()
            ));
            let outcome = tolerate(
                self.download_model_resource(resource, folder.as_std_path()),
                "RAPID input download",
            )?;
            report.downloaded.push(SyncedResource {
                resource: resource.name.clone(),
                folder,
                outcome,
            });
        }
        Ok(report)
    }
}

fn local_mirrors(local_root: &Utf8Path) -> Result<Vec<LocalMirror>, SptError> {
    let entries = fs::read_dir(local_root)
        .map_err(|err| SptError::Filesystem(format!("read dir {local_root}: {err}")))?;
    let mut mirrors = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SptError::Filesystem(err.to_string()))?;
        if !entry.path().is_dir() {
            continue;
        }
        let Ok(folder) = Utf8PathBuf::from_path_buf(entry.path()) else {
            warn!(path = %entry.path().display(), "skipping non UTF-8 directory");
            continue;
        };
        mirrors.extend(LocalMirror::from_folder(folder));
    }
    mirrors.sort_by(|a, b| a.folder.cmp(&b.folder));
    Ok(mirrors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_without_dash_has_empty_subbasin() {
        let mirror = LocalMirror::from_folder(Utf8PathBuf::from("/data/nfie_texas")).unwrap();
        assert_eq!(mirror.watershed, "nfie_texas");
        assert_eq!(mirror.subbasin, "");

        let mirror = LocalMirror::from_folder(Utf8PathBuf::from("/data/magdalena-el_banco"))
            .unwrap();
        assert_eq!(mirror.watershed, "magdalena");
        assert_eq!(mirror.subbasin, "el_banco");
    }
}

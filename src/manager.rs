use chrono::Datelike;
use tracing::{info, warn};

use crate::catalog::{
    CatalogClient, CatalogDataset, CatalogResource, DatasetQuery, NewDataset, TETHYS_APP,
};
use crate::error::SptError;
use crate::identity::{IdentityStrategy, ResourceVariant, RunContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMetadata {
    pub dataset_notes: String,
    pub resource_description: String,
    pub owner_org: Option<String>,
}

impl DatasetMetadata {
    pub fn for_strategy(strategy: &IdentityStrategy) -> Self {
        let (dataset_notes, resource_description) = match strategy {
            IdentityStrategy::Ensemble { .. } => (
                "ECMWF-RAPID Flood Prediction Dataset".to_string(),
                "NetCDF3 files produced by downscaling ECMWF forecasts and routing them with RAPID"
                    .to_string(),
            ),
            IdentityStrategy::Generic { model_name, .. }
                if model_name == crate::identity::WRF_HYDRO_MODEL =>
            {
                (
                    "WRF-Hydro HRRR Flood Prediction Dataset".to_string(),
                    "NetCDF3 files produced by downscaling WRF-Hydro forecasts and routing them with RAPID"
                        .to_string(),
                )
            }
            IdentityStrategy::Generic { .. } => {
                ("CKAN Dataset".to_string(), "CKAN Resource".to_string())
            }
            IdentityStrategy::RapidInput { model_name, .. } => (
                format!("RAPID Input Dataset for {model_name}"),
                format!("RAPID input files for {model_name}"),
            ),
        };
        Self {
            dataset_notes,
            resource_description,
            owner_org: None,
        }
    }

    pub fn with_owner_org(mut self, owner_org: Option<String>) -> Self {
        self.owner_org = owner_org.filter(|org| !org.trim().is_empty());
        self
    }
}

pub struct DatasetManager<C: CatalogClient> {
    catalog: C,
    strategy: IdentityStrategy,
    metadata: DatasetMetadata,
}

impl<C: CatalogClient> DatasetManager<C> {
    pub fn new(catalog: C, strategy: IdentityStrategy, metadata: DatasetMetadata) -> Self {
        Self {
            catalog,
            strategy,
            metadata,
        }
    }

    pub fn with_defaults(catalog: C, strategy: IdentityStrategy) -> Self {
        let metadata = DatasetMetadata::for_strategy(&strategy);
        Self::new(catalog, strategy, metadata)
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn strategy(&self) -> &IdentityStrategy {
        &self.strategy
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    pub fn context(
        &self,
        watershed: &str,
        subbasin: &str,
        date_string: &str,
    ) -> Result<RunContext, SptError> {
        self.strategy.context(watershed, subbasin, date_string)
    }

    pub fn dataset_name(&self, ctx: &RunContext) -> String {
        self.strategy.dataset_name(ctx)
    }

    pub fn resource_name(&self, ctx: &RunContext, variant: Option<&ResourceVariant>) -> String {
        self.strategy.resource_name(ctx, variant)
    }

    pub fn dataset_info(&self, ctx: &RunContext) -> Result<Option<CatalogDataset>, SptError> {
        self.find_dataset(&self.dataset_name(ctx))
    }

    pub(crate) fn find_dataset(&self, name: &str) -> Result<Option<CatalogDataset>, SptError> {
        let page = self.catalog.search_datasets(&DatasetQuery::exact(name))?;
        Ok(page.results.into_iter().find(|dataset| dataset.name == name))
    }

    pub fn resource_info(
        &self,
        ctx: &RunContext,
        variant: Option<&ResourceVariant>,
    ) -> Result<Option<CatalogResource>, SptError> {
        let Some(dataset) = self.dataset_info(ctx)? else {
            return Ok(None);
        };
        self.find_resource(&dataset.id, &self.resource_name(ctx, variant))
    }

    pub(crate) fn find_resource(
        &self,
        dataset_id: &str,
        name: &str,
    ) -> Result<Option<CatalogResource>, SptError> {
        let page = self.catalog.search_resources(name, dataset_id)?;
        Ok(page.results.into_iter().find(|resource| resource.name == name))
    }

    pub fn ensure_dataset(&self, ctx: &RunContext) -> Result<String, SptError> {
        let name = self.dataset_name(ctx);
        if let Some(existing) = self.find_dataset(&name)? {
            return Ok(existing.id);
        }

        let date = ctx.forecast_date();
        let request = NewDataset {
            name: name.clone(),
            notes: self.metadata.dataset_notes.clone(),
            version: "1.0".to_string(),
            tethys_app: TETHYS_APP.to_string(),
            watershed: ctx.watershed().to_string(),
            subbasin: ctx.subbasin().to_string(),
            month: date.month(),
            year: date.year(),
            owner_org: self.metadata.owner_org.clone(),
        };
        let created = self.catalog.create_dataset(&request)?;
        match created.id {
            Some(id) => {
                info!(dataset = %name, id = %id, "dataset created");
                Ok(id)
            }
            None => {
                warn!(dataset = %name, response = %created.raw, "dataset creation returned no id");
                Err(SptError::MissingDatasetId(name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_presets() {
        let ecmwf = DatasetMetadata::for_strategy(&IdentityStrategy::ecmwf());
        assert!(ecmwf.dataset_notes.starts_with("ECMWF-RAPID"));
        let wrf = DatasetMetadata::for_strategy(&IdentityStrategy::wrf_hydro());
        assert!(wrf.dataset_notes.starts_with("WRF-Hydro"));
        let rapid =
            DatasetMetadata::for_strategy(&IdentityStrategy::rapid_input("ecmwf", "abc123"));
        assert_eq!(rapid.dataset_notes, "RAPID Input Dataset for ecmwf");
        assert_eq!(rapid.owner_org, None);
        assert_eq!(
            rapid.with_owner_org(Some("  ".to_string())).owner_org,
            None
        );
    }
}

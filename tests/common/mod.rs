#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::Value;

use spt_dataset_manager::catalog::{
    CatalogClient, CatalogDataset, CatalogResource, CreatedDataset, DatasetQuery, NewDataset,
    NewResource, SearchPage,
};
use spt_dataset_manager::error::SptError;

#[derive(Default)]
pub struct MockCatalog {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    datasets: Vec<CatalogDataset>,
    blobs: HashMap<String, Vec<u8>>,
    failing_deletes: HashSet<String>,
    failing_resource_searches: HashSet<String>,
    failing_resource_creates: HashSet<String>,
    calls: Vec<String>,
    next_id: usize,
    omit_created_id: bool,
}

impl MockCatalog {
    pub fn with_datasets(datasets: Vec<CatalogDataset>) -> Self {
        let catalog = Self::default();
        catalog.state.lock().unwrap().datasets = datasets;
        catalog
    }

    pub fn add_blob(&self, url: &str, content: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(url.to_string(), content);
    }

    pub fn fail_delete_of(&self, dataset_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(dataset_id.to_string());
    }

    pub fn fail_search_resources(&self, resource_name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_resource_searches
            .insert(resource_name.to_string());
    }

    pub fn fail_create_resource(&self, resource_name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_resource_creates
            .insert(resource_name.to_string());
    }

    pub fn omit_created_id(&self) {
        self.state.lock().unwrap().omit_created_id = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn dataset_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .datasets
            .iter()
            .map(|dataset| dataset.name.clone())
            .collect()
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .datasets
            .iter()
            .flat_map(|dataset| dataset.resources.iter().map(|r| r.name.clone()))
            .collect()
    }
}

impl CatalogClient for MockCatalog {
    fn search_datasets(
        &self,
        query: &DatasetQuery,
    ) -> Result<SearchPage<CatalogDataset>, SptError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("search_datasets:{}", query.name));
        let mut matches: Vec<CatalogDataset> = state
            .datasets
            .iter()
            .filter(|dataset| match query.name.strip_suffix('*') {
                Some(prefix) => dataset.name.starts_with(prefix),
                None => dataset.name == query.name,
            })
            .cloned()
            .collect();
        if query.sort.is_some() {
            matches.sort_by(|a, b| a.name.cmp(&b.name));
        }
        let count = matches.len();
        let results = matches
            .into_iter()
            .skip(query.start)
            .take(query.rows.unwrap_or(usize::MAX))
            .collect();
        Ok(SearchPage { count, results })
    }

    fn create_dataset(&self, dataset: &NewDataset) -> Result<CreatedDataset, SptError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_dataset:{}", dataset.name));
        if state.omit_created_id {
            return Ok(CreatedDataset {
                id: None,
                raw: Value::Null,
            });
        }
        state.next_id += 1;
        let id = format!("ds-{}", state.next_id);
        state.datasets.push(CatalogDataset {
            id: id.clone(),
            name: dataset.name.clone(),
            ..CatalogDataset::default()
        });
        Ok(CreatedDataset {
            id: Some(id),
            raw: Value::Null,
        })
    }

    fn delete_dataset(&self, id: &str) -> Result<(), SptError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_dataset:{id}"));
        if state.failing_deletes.contains(id) {
            return Err(SptError::CatalogStatus {
                status: 500,
                message: "boom".to_string(),
            });
        }
        state.datasets.retain(|dataset| dataset.id != id);
        Ok(())
    }

    fn search_resources(
        &self,
        name: &str,
        dataset_id: &str,
    ) -> Result<SearchPage<CatalogResource>, SptError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("search_resources:{name}"));
        if state.failing_resource_searches.contains(name) {
            return Err(SptError::CatalogHttp("connection reset".to_string()));
        }
        let results: Vec<CatalogResource> = state
            .datasets
            .iter()
            .filter(|dataset| dataset.id == dataset_id)
            .flat_map(|dataset| dataset.resources.iter())
            .filter(|resource| resource.name == name)
            .cloned()
            .collect();
        Ok(SearchPage {
            count: results.len(),
            results,
        })
    }

    fn create_resource(
        &self,
        dataset_id: &str,
        resource: &NewResource,
        file: &Path,
    ) -> Result<CatalogResource, SptError> {
        let content = fs::read(file).map_err(|err| SptError::Filesystem(err.to_string()))?;
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_resource:{}", resource.name));
        if state.failing_resource_creates.contains(&resource.name) {
            return Err(SptError::CatalogStatus {
                status: 409,
                message: "upload rejected".to_string(),
            });
        }
        state.next_id += 1;
        let url = format!("mock://{}", resource.name);
        let mut tags = BTreeMap::new();
        tags.insert(
            "watershed".to_string(),
            Value::String(resource.watershed.clone()),
        );
        tags.insert(
            "subbasin".to_string(),
            Value::String(resource.subbasin.clone()),
        );
        let created = CatalogResource {
            id: format!("res-{}", state.next_id),
            name: resource.name.clone(),
            url: url.clone(),
            format: resource.format.to_string(),
            created: Some("2016-07-11T12:00:00.000000".to_string()),
            package_id: Some(dataset_id.to_string()),
            tags,
        };
        state.blobs.insert(url, content);
        let dataset = state
            .datasets
            .iter_mut()
            .find(|dataset| dataset.id == dataset_id)
            .ok_or_else(|| SptError::CatalogResponse("unknown dataset".to_string()))?;
        dataset.resources.push(created.clone());
        dataset.num_resources = dataset.resources.len();
        Ok(created)
    }

    fn delete_resource(&self, id: &str) -> Result<(), SptError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_resource:{id}"));
        for dataset in &mut state.datasets {
            dataset.resources.retain(|resource| resource.id != id);
            dataset.num_resources = dataset.resources.len();
        }
        Ok(())
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), SptError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("download:{url}"));
        let content = state
            .blobs
            .get(url)
            .cloned()
            .ok_or_else(|| SptError::CatalogStatus {
                status: 404,
                message: url.to_string(),
            })?;
        fs::write(destination, content).map_err(|err| SptError::Filesystem(err.to_string()))
    }
}

pub fn dataset(id: &str, name: &str, resources: Vec<CatalogResource>) -> CatalogDataset {
    CatalogDataset {
        id: id.to_string(),
        name: name.to_string(),
        num_resources: resources.len(),
        resources,
        extras: BTreeMap::new(),
    }
}

pub fn resource(name: &str, format: &str) -> CatalogResource {
    CatalogResource {
        id: format!("id-{name}"),
        name: name.to_string(),
        url: format!("mock://{name}"),
        format: format.to_string(),
        ..CatalogResource::default()
    }
}

pub fn tagged_resource(
    name: &str,
    watershed: &str,
    subbasin: &str,
    created: &str,
) -> CatalogResource {
    let mut resource = resource(name, "zip");
    resource
        .tags
        .insert("watershed".to_string(), Value::String(watershed.to_string()));
    resource
        .tags
        .insert("subbasin".to_string(), Value::String(subbasin.to_string()));
    resource.created = Some(created.to_string());
    resource
}

pub fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_path(name).unwrap();
        header.set_cksum();
        builder.append(&header, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn tar_gz_raw_name(name: &str, content: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_old();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    let stored = &mut header.as_old_mut().name;
    stored[..name.len()].copy_from_slice(name.as_bytes());
    header.set_cksum();
    builder.append(&header, content).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

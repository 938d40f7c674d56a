use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDateTime;
use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::archive::ResourceFormat;
use crate::error::SptError;

pub const TETHYS_APP: &str = "streamflow_prediction_tool";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogResource {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub format: String,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub package_id: Option<String>,
    #[serde(flatten)]
    pub tags: BTreeMap<String, Value>,
}

impl CatalogResource {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).and_then(|value| value.as_str())
    }

    pub fn watershed(&self) -> Option<&str> {
        self.tag("watershed")
    }

    pub fn subbasin(&self) -> Option<&str> {
        self.tag("subbasin")
    }

    pub fn resource_format(&self) -> ResourceFormat {
        match self.format.parse() {
            Ok(format) => format,
            Err(_) => ResourceFormat::Other(self.format.clone()),
        }
    }

    pub fn created_at(&self) -> Option<NaiveDateTime> {
        let created = self.created.as_deref()?;
        let whole_seconds = created.split('.').next().unwrap_or(created);
        NaiveDateTime::parse_from_str(whole_seconds, "%Y-%m-%dT%H:%M:%S").ok()
    }
}

// CKAN emits `null` for unset resource columns.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub num_resources: usize,
    #[serde(default)]
    pub resources: Vec<CatalogResource>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchPage<T> {
    #[serde(default)]
    pub count: usize,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetQuery {
    pub name: String,
    pub rows: Option<usize>,
    pub start: usize,
    pub sort: Option<String>,
}

impl DatasetQuery {
    pub fn exact(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: None,
            start: 0,
            sort: None,
        }
    }

    pub fn prefix(prefix: &str) -> Self {
        Self {
            name: format!("{prefix}*"),
            rows: None,
            start: 0,
            sort: None,
        }
    }

    pub fn rows(mut self, rows: usize) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn sort(mut self, sort: &str) -> Self {
        self.sort = Some(sort.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDataset {
    pub name: String,
    pub notes: String,
    pub version: String,
    pub tethys_app: String,
    pub watershed: String,
    pub subbasin: String,
    pub month: u32,
    pub year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_org: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedDataset {
    pub id: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewResource {
    pub name: String,
    pub format: ResourceFormat,
    pub watershed: String,
    pub subbasin: String,
    pub forecast_date: String,
    pub description: String,
}

pub trait CatalogClient {
    fn search_datasets(&self, query: &DatasetQuery)
    -> Result<SearchPage<CatalogDataset>, SptError>;
    fn create_dataset(&self, dataset: &NewDataset) -> Result<CreatedDataset, SptError>;
    fn delete_dataset(&self, id: &str) -> Result<(), SptError>;
    fn search_resources(
        &self,
        name: &str,
        dataset_id: &str,
    ) -> Result<SearchPage<CatalogResource>, SptError>;
    fn create_resource(
        &self,
        dataset_id: &str,
        resource: &NewResource,
        file: &Path,
    ) -> Result<CatalogResource, SptError>;
    fn delete_resource(&self, id: &str) -> Result<(), SptError>;
    fn download(&self, url: &str, destination: &Path) -> Result<(), SptError>;
}

#[derive(Debug, Deserialize)]
struct ActionEnvelope<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Clone)]
pub struct CkanHttpClient {
    client: Client,
    endpoint: String,
}

impl CkanHttpClient {
    pub fn new(endpoint: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, SptError> {
        let endpoint = normalize_ckan_endpoint(endpoint)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("spt-dm/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SptError::InvalidEndpoint(err.to_string()))?,
        );
        if let Some(api_key) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(api_key)
                    .map_err(|err| SptError::InvalidEndpoint(err.to_string()))?,
            );
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| SptError::CatalogHttp(err.to_string()))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn action_url(&self, action: &str) -> String {
        format!("{}/{action}", self.endpoint)
    }

    fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SptError> {
        self.call_optional(request)?
            .ok_or_else(|| SptError::CatalogResponse("missing result".to_string()))
    }

    fn call_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, SptError> {
        let response = request
            .send()
            .map_err(|err| SptError::CatalogHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let envelope: ActionEnvelope<T> = response
            .json()
            .map_err(|err| SptError::CatalogResponse(err.to_string()))?;
        if !envelope.success {
            let detail = envelope
                .error
                .map(|error| error.to_string())
                .unwrap_or_else(|| "success=false".to_string());
            return Err(SptError::CatalogResponse(detail));
        }
        Ok(envelope.result)
    }

    fn handle_status(response: Response) -> Result<Response, SptError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "catalog request failed".to_string());
        Err(SptError::CatalogStatus { status, message })
    }
}

impl CatalogClient for CkanHttpClient {
    fn search_datasets(
        &self,
        query: &DatasetQuery,
    ) -> Result<SearchPage<CatalogDataset>, SptError> {
        let mut params = vec![
            ("fq".to_string(), format!("name:{}", query.name)),
            ("start".to_string(), query.start.to_string()),
        ];
        if let Some(rows) = query.rows {
            params.push(("rows".to_string(), rows.to_string()));
        }
        if let Some(sort) = &query.sort {
            params.push(("sort".to_string(), sort.clone()));
        }
        debug!(query = %query.name, start = query.start, "package_search");
        self.call(self.client.get(self.action_url("package_search")).query(&params))
    }

    fn create_dataset(&self, dataset: &NewDataset) -> Result<CreatedDataset, SptError> {
        let raw: Value =
            self.call(self.client.post(self.action_url("package_create")).json(dataset))?;
        let id = raw
            .get("id")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string());
        Ok(CreatedDataset { id, raw })
    }

    fn delete_dataset(&self, id: &str) -> Result<(), SptError> {
        let _: Option<Value> = self.call_optional(
            self.client
                .post(self.action_url("package_delete"))
                .json(&json!({ "id": id })),
        )?;
        Ok(())
    }

    fn search_resources(
        &self,
        name: &str,
        dataset_id: &str,
    ) -> Result<SearchPage<CatalogResource>, SptError> {
        let page: SearchPage<CatalogResource> = self.call(
            self.client
                .get(self.action_url("resource_search"))
                .query(&[("query", format!("name:{name}"))]),
        )?;
        // resource_search is catalog-wide; keep only this dataset's entries.
        let results = page
            .results
            .into_iter()
            .filter(|resource| {
                resource
                    .package_id
                    .as_deref()
                    .is_none_or(|package| package == dataset_id)
            })
            .collect::<Vec<_>>();
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
        let form = Form::new()
            .text("package_id", dataset_id.to_string())
            .text("name", resource.name.clone())
            .text("format", resource.format.to_string())
            .text("tethys_app", TETHYS_APP)
            .text("watershed", resource.watershed.clone())
            .text("subbasin", resource.subbasin.clone())
            .text("forecast_date", resource.forecast_date.clone())
            .text("description", resource.description.clone())
            .text("url", "")
            .file("upload", file)
            .map_err(|err| SptError::Filesystem(format!("read {}: {err}", file.display())))?;
        self.call(
            self.client
                .post(self.action_url("resource_create"))
                .multipart(form),
        )
    }

    fn delete_resource(&self, id: &str) -> Result<(), SptError> {
        let _: Option<Value> = self.call_optional(
            self.client
                .post(self.action_url("resource_delete"))
                .json(&json!({ "id": id })),
        )?;
        Ok(())
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), SptError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| SptError::CatalogHttp(err.to_string()))?;
        let mut response = Self::handle_status(response)?;
        let mut file = File::create(destination)
            .map_err(|err| SptError::Filesystem(format!("create {}: {err}", destination.display())))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| SptError::CatalogHttp(err.to_string()))?;
        Ok(())
    }
}

pub fn normalize_ckan_endpoint(endpoint: &str) -> Result<String, SptError> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(SptError::InvalidEndpoint(endpoint.to_string()));
    }
    if trimmed.ends_with("api/action") || trimmed.ends_with("api/3/action") {
        return Ok(trimmed.to_string());
    }
    Ok(format!("{trimmed}/api/3/action"))
}

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::archive;
use crate::error::SptError;

const REQUIRED_SHAPEFILE_EXTENSIONS: [&str; 4] = ["shp", "shx", "prj", "dbf"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerGroup {
    pub name: String,
    pub layers: Vec<String>,
}

pub trait SpatialCatalogClient {
    fn create_workspace(&self, workspace: &str, uri: &str) -> Result<(), SptError>;
    fn create_shapefile_resource(
        &self,
        layer_id: &str,
        shapefile_zip: Vec<u8>,
        overwrite: bool,
    ) -> Result<Value, SptError>;
    fn delete_layer(&self, layer_id: &str) -> Result<(), SptError>;
    fn delete_resource(&self, layer_id: &str) -> Result<(), SptError>;
    fn delete_store(&self, layer_id: &str) -> Result<(), SptError>;
    fn get_layer_group(&self, group_id: &str) -> Result<LayerGroup, SptError>;
    fn delete_layer_group(&self, group_id: &str) -> Result<(), SptError>;
}

pub struct GeoServerHttpClient {
    client: Client,
    endpoint: String,
    username: String,
    password: String,
}

impl GeoServerHttpClient {
    pub fn new(
        endpoint: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, SptError> {
        let endpoint = normalize_geoserver_endpoint(endpoint)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("spt-dm/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SptError::GeoServerHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| SptError::GeoServerHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoint)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, SptError> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .map_err(|err| SptError::GeoServerHttp(err.to_string()))?;
        Self::handle_status(response)
    }

    fn handle_status(response: Response) -> Result<Response, SptError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "GeoServer request failed".to_string());
        Err(SptError::GeoServerStatus { status, message })
    }

    fn exists(&self, path: &str) -> Result<bool, SptError> {
        match self.send(self.client.get(self.url(path))) {
            Ok(_) => Ok(true),
            Err(SptError::GeoServerStatus { status: 404, .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl SpatialCatalogClient for GeoServerHttpClient {
    fn create_workspace(&self, workspace: &str, uri: &str) -> Result<(), SptError> {
        if self.exists(&format!("workspaces/{workspace}.json"))? {
            debug!(workspace, "workspace exists");
            return Ok(());
        }
        let body = json!({ "namespace": { "prefix": workspace, "uri": uri } });
        self.send(self.client.post(self.url("namespaces")).json(&body))?;
        info!(workspace, "workspace created");
        Ok(())
    }

    fn create_shapefile_resource(
        &self,
        layer_id: &str,
        shapefile_zip: Vec<u8>,
        overwrite: bool,
    ) -> Result<Value, SptError> {
        let (workspace, name) = split_layer_id(layer_id)?;
        let store = format!("workspaces/{workspace}/datastores/{name}");
        if !overwrite && self.exists(&format!("{store}.json"))? {
            return Err(SptError::GeoServerStatus {
                status: 409,
                message: format!("store {layer_id} already exists"),
            });
        }
        let mut request = self
            .client
            .put(self.url(&format!("{store}/file.shp")))
            .header(CONTENT_TYPE, "application/zip")
            .body(shapefile_zip);
        if overwrite {
            request = request.query(&[("update", "overwrite")]);
        }
        self.send(request)?;
        self.send(self.client.get(self.url(&format!("layers/{layer_id}.json"))))?
            .json()
            .map_err(|err| SptError::GeoServerHttp(err.to_string()))
    }

    fn delete_layer(&self, layer_id: &str) -> Result<(), SptError> {
        self.send(self.client.delete(self.url(&format!("layers/{layer_id}"))))?;
        Ok(())
    }

    fn delete_resource(&self, layer_id: &str) -> Result<(), SptError> {
        let (workspace, name) = split_layer_id(layer_id)?;
        self.send(self.client.delete(self.url(&format!(
            "workspaces/{workspace}/datastores/{name}/featuretypes/{name}"
        ))))?;
        Ok(())
    }

    fn delete_store(&self, layer_id: &str) -> Result<(), SptError> {
        let (workspace, name) = split_layer_id(layer_id)?;
        self.send(
            self.client
                .delete(self.url(&format!("workspaces/{workspace}/datastores/{name}")))
                .query(&[("recurse", "true")]),
        )?;
        Ok(())
    }

    fn get_layer_group(&self, group_id: &str) -> Result<LayerGroup, SptError> {
        let body: Value = self
            .send(self.client.get(self.url(&format!("layergroups/{group_id}.json"))))?
            .json()
            .map_err(|err| SptError::GeoServerHttp(err.to_string()))?;
        parse_layer_group(&body)
    }

    fn delete_layer_group(&self, group_id: &str) -> Result<(), SptError> {
        self.send(self.client.delete(self.url(&format!("layergroups/{group_id}"))))?;
        Ok(())
    }
}

pub fn normalize_geoserver_endpoint(endpoint: &str) -> Result<String, SptError> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let normalized = if trimmed.ends_with("/geoserver/rest") {
        trimmed.to_string()
    } else if trimmed.ends_with("/geoserver") {
        format!("{trimmed}/rest")
    } else {
        format!("{trimmed}/geoserver/rest")
    };
    let valid_scheme = normalized.starts_with("http://") || normalized.starts_with("https://");
    if !valid_scheme || normalized.matches("/geoserver").count() != 1 {
        return Err(SptError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(normalized)
}

fn split_layer_id(layer_id: &str) -> Result<(&str, &str), SptError> {
    layer_id
        .split_once(':')
        .filter(|(workspace, name)| !workspace.is_empty() && !name.is_empty())
        .ok_or_else(|| SptError::GeoServerHttp(format!("unqualified layer id: {layer_id}")))
}

pub fn parse_layer_group(body: &Value) -> Result<LayerGroup, SptError> {
    let group = body
        .get("layerGroup")
        .ok_or_else(|| SptError::GeoServerHttp("missing layerGroup".to_string()))?;
    let name = group
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let published = group
        .get("publishables")
        .and_then(|publishables| publishables.get("published"));
    let layers = match published {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        Some(item @ Value::Object(_)) => item
            .get("name")
            .and_then(Value::as_str)
            .map(|name| vec![name.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    Ok(LayerGroup { name, layers })
}

pub struct GeoServerManager<G: SpatialCatalogClient> {
    client: G,
    workspace: String,
    empty_shapefile: Option<PathBuf>,
}

impl<G: SpatialCatalogClient> GeoServerManager<G> {
    pub fn new(
        client: G,
        app_instance_id: &str,
        empty_shapefile: Option<PathBuf>,
    ) -> Result<Self, SptError> {
        let workspace = format!("spt-{app_instance_id}");
        client.create_workspace(&workspace, app_instance_id)?;
        Ok(Self {
            client,
            workspace,
            empty_shapefile,
        })
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn client(&self) -> &G {
        &self.client
    }

    pub fn check_shapefile_input_files(files: &[PathBuf]) -> Result<(), SptError> {
        let missing: Vec<&str> = REQUIRED_SHAPEFILE_EXTENSIONS
            .iter()
            .copied()
            .filter(|required| {
                !files.iter().any(|file| {
                    file.extension().and_then(|ext| ext.to_str()) == Some(*required)
                })
            })
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let listed: Vec<String> = missing.iter().map(|ext| format!(".{ext}")).collect();
        Err(SptError::ShapefileIncomplete(listed.join(", ")))
    }

    pub fn rename_shapefile_input_files(
        files: &mut [PathBuf],
        new_name: &str,
    ) -> Result<(), SptError> {
        for file in files.iter_mut() {
            let extension = file
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or_default()
                .to_string();
            let renamed = archive::parent_dir(file).join(format!("{new_name}.{extension}"));
            fs::rename(&*file, &renamed).map_err(|err| {
                SptError::Filesystem(format!("rename {}: {err}", file.display()))
            })?;
            *file = renamed;
        }
        Ok(())
    }

    pub fn layer_name(&self, resource_name: &str) -> String {
        if resource_name.starts_with(&format!("{}:", self.workspace)) {
            resource_name.to_string()
        } else {
            format!("{}:{resource_name}", self.workspace)
        }
    }

    pub fn upload_shapefile(
        &self,
        resource_name: &str,
        files: &mut [PathBuf],
        rename: bool,
        overwrite: bool,
    ) -> Result<Option<(String, Value)>, SptError> {
        Self::check_shapefile_input_files(files)?;
        if rename {
            Self::rename_shapefile_input_files(files, resource_name)?;
        }
        let layer_name = self.layer_name(resource_name);
        let shapefile_zip = archive::zip_files(files)?;
        match self
            .client
            .create_shapefile_resource(&layer_name, shapefile_zip, overwrite)
        {
            Ok(result) => {
                info!(layer = %layer_name, "shapefile uploaded");
                Ok(Some((layer_name, result)))
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(layer = %layer_name, error = %err, "shapefile upload failed");
                Ok(None)
            }
        }
    }

    pub fn purge_remove_layer(&self, layer_id: &str) -> Result<(), SptError> {
        let layer_id = self.layer_name(layer_id);
        self.delete_layer_parts(&layer_id);

        let Some(empty_shapefile) = &self.empty_shapefile else {
            return Ok(());
        };
        let stem = empty_shapefile
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let mut parts =
            archive::matching_entries(archive::parent_dir(empty_shapefile), &format!("{stem}*"))?;
        info!(layer = %layer_id, "uploading placeholder shapefile to reclaim disk");
        if self
            .upload_shapefile(&layer_id, &mut parts, false, true)?
            .is_some()
        {
            self.delete_layer_parts(&layer_id);
        }
        Ok(())
    }

    fn delete_layer_parts(&self, layer_id: &str) {
        debug!(layer = %layer_id, "deleting layer");
        if let Err(err) = self.client.delete_layer(layer_id) {
            warn!(layer = %layer_id, error = %err, "layer delete failed");
        }
        if let Err(err) = self.client.delete_resource(layer_id) {
            warn!(layer = %layer_id, error = %err, "feature type delete failed");
        }
        if let Err(err) = self.client.delete_store(layer_id) {
            warn!(layer = %layer_id, error = %err, "store delete failed");
        }
    }

    pub fn purge_remove_layer_group(&self, group_id: &str) -> Result<Vec<String>, SptError> {
        let group = match self.client.get_layer_group(group_id) {
            Ok(group) => group,
            Err(err) => {
                warn!(group = group_id, error = %err, "layer group lookup failed");
                return Ok(Vec::new());
            }
        };
        if let Err(err) = self.client.delete_layer_group(group_id) {
            warn!(group = group_id, error = %err, "layer group delete failed");
        }
        let mut purged = Vec::new();
        for layer in &group.layers {
            let layer_id = self.layer_name(layer);
            self.purge_remove_layer(&layer_id)?;
            purged.push(layer_id);
        }
        Ok(purged)
    }
}

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::SptError;

pub const CONFIG_FILE_NAME: &str = "spt-dm.json";
pub const CKAN_API_KEY_ENV: &str = "SPT_CKAN_API_KEY";
pub const GEOSERVER_PASSWORD_ENV: &str = "SPT_GEOSERVER_PASSWORD";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ckan: Option<CkanSection>,
    #[serde(default)]
    pub geoserver: Option<GeoServerSection>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CkanSection {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub owner_org: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GeoServerSection {
    pub endpoint: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    pub app_instance_id: String,
    #[serde(default)]
    pub empty_shapefile: Option<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CkanSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub owner_org: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoServerSettings {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub app_instance_id: String,
    pub empty_shapefile: Option<PathBuf>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    pub ckan: Option<CkanSettings>,
    pub geoserver: Option<GeoServerSettings>,
}

impl ResolvedConfig {
    pub fn ckan(&self) -> Result<&CkanSettings, SptError> {
        self.ckan
            .as_ref()
            .ok_or(SptError::MissingConfigSection("ckan"))
    }

    pub fn geoserver(&self) -> Result<&GeoServerSettings, SptError> {
        self.geoserver
            .as_ref()
            .ok_or(SptError::MissingConfigSection("geoserver"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub ckan_api_key: Option<String>,
    pub geoserver_password: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let read = |name| env::var(name).ok().filter(|value: &String| !value.is_empty());
        Self {
            ckan_api_key: read(CKAN_API_KEY_ENV),
            geoserver_password: read(GEOSERVER_PASSWORD_ENV),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SptError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => Self::default_location().ok_or(SptError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SptError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SptError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config, EnvOverrides::from_env())
    }

    fn default_location() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "spt-dataset-manager")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(
        config: Config,
        overrides: EnvOverrides,
    ) -> Result<ResolvedConfig, SptError> {
        let ckan = config.ckan.map(|section| CkanSettings {
            endpoint: section.endpoint,
            api_key: overrides
                .ckan_api_key
                .or(section.api_key)
                .filter(|key| !key.trim().is_empty()),
            owner_org: section.owner_org.filter(|org| !org.trim().is_empty()),
            timeout: Duration::from_secs(section.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        });

        let geoserver = match config.geoserver {
            Some(section) => {
                let password = overrides
                    .geoserver_password
                    .or(section.password)
                    .ok_or_else(|| {
                        SptError::ConfigParse(format!(
                            "geoserver.password is not set (or {GEOSERVER_PASSWORD_ENV})"
                        ))
                    })?;
                Some(GeoServerSettings {
                    endpoint: section.endpoint,
                    username: section.username,
                    password,
                    app_instance_id: section.app_instance_id,
                    empty_shapefile: section.empty_shapefile,
                    timeout: Duration::from_secs(
                        section.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
                    ),
                })
            }
            None => None,
        };

        Ok(ResolvedConfig { ckan, geoserver })
    }
}

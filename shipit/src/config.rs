use std::{
    collections::HashSet,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::unit::{BuildVariant, CacheHint, ServiceUnit};

pub const DEFAULT_CONFIG_PATH: &str = "shipit.yaml";
pub const DEFAULT_BASE_IMAGE: &str = "cgr.dev/chainguard/busybox:latest";
pub const DEFAULT_LOGICAL_REGISTRY: &str = "registry.local";

/// Longest tag a registry accepts.
const MAX_TAG_LEN: usize = 128;

fn default_base_image() -> String {
    DEFAULT_BASE_IMAGE.to_owned()
}

fn default_logical_registry() -> String {
    DEFAULT_LOGICAL_REGISTRY.to_owned()
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

/// The release configuration file.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Domain of the stable image names deployment manifests refer to.
    #[serde(default = "default_logical_registry")]
    pub logical_registry: String,
    /// Tags for services that do not declare their own.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Base image for native services that do not declare their own.
    #[serde(default = "default_base_image")]
    pub base_image: String,
    #[serde(default)]
    pub ecr: Option<EcrConfig>,
    #[serde(default)]
    pub native_services: Vec<NativeService>,
    #[serde(default)]
    pub docker_services: Vec<DockerService>,
}

#[derive(Debug, Deserialize)]
pub struct EcrConfig {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub region: String,
}

#[derive(Debug, Deserialize)]
pub struct NativeService {
    pub name: String,
    pub main: String,
    pub tags: Option<Vec<String>>,
    pub base_image: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DockerService {
    pub dockerfile: PathBuf,
    #[serde(default = "default_context")]
    pub context: PathBuf,
    pub tags: Option<Vec<String>>,
    pub namespace: Option<String>,
    /// Repository to keep the shared layer cache of all targets in.
    pub cache_repository: Option<String>,
    pub targets: Vec<Target>,
}

#[derive(Debug, Deserialize)]
pub struct Target {
    pub name: String,
    /// The stage of a multi-stage build file, the last stage when absent.
    pub target: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: io::Error },
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed reading config file {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed parsing config file {}: {source}", path.display())
            }
            ConfigError::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)
    }

    /// Expands the configuration into one [`ServiceUnit`] per native service and per docker
    /// target, applying defaults.
    pub fn units(&self) -> Result<Vec<ServiceUnit>, ConfigError> {
        let mut units = Vec::with_capacity(
            self.native_services.len()
                + self
                    .docker_services
                    .iter()
                    .map(|service| service.targets.len())
                    .sum::<usize>(),
        );

        for service in &self.native_services {
            if service.main.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "native service `{}` has no main package",
                    service.name
                )));
            }
            units.push(ServiceUnit {
                name: service.name.clone(),
                tags: service.tags.clone().unwrap_or_else(|| self.tags.clone()),
                namespace: service.namespace.clone(),
                variant: BuildVariant::Native {
                    source: service.main.clone(),
                    base_image: service
                        .base_image
                        .clone()
                        .unwrap_or_else(|| self.base_image.clone()),
                },
            });
        }

        for service in &self.docker_services {
            let dockerfile = service.dockerfile.display();
            if service.targets.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "docker service {dockerfile} declares no targets"
                )));
            }
            let tags = service.tags.clone().unwrap_or_else(|| self.tags.clone());
            if tags.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "docker service {dockerfile} needs at least one tag to look up its digest"
                )));
            }
            let cache = service.cache_repository.as_ref().map(|repository| CacheHint {
                repository: repository.clone(),
                key: cache_key(&service.targets),
            });
            for target in &service.targets {
                units.push(ServiceUnit {
                    name: target.name.clone(),
                    tags: tags.clone(),
                    namespace: service.namespace.clone(),
                    variant: BuildVariant::External {
                        build_file: service.dockerfile.clone(),
                        context: service.context.clone(),
                        target: target.target.clone(),
                        cache: cache.clone(),
                    },
                });
            }
        }

        let mut names = HashSet::with_capacity(units.len());
        for unit in &units {
            if unit.name.is_empty() {
                return Err(ConfigError::Invalid("a service has an empty name".to_owned()));
            }
            if !names.insert(unit.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "service name `{}` is declared more than once",
                    unit.name
                )));
            }
        }

        Ok(units)
    }
}

/// Derives the cache tag shared by all targets of one build file from their names, so the key
/// changes when the set of targets does.
pub fn cache_key(targets: &[Target]) -> String {
    let joined = targets
        .iter()
        .map(|target| target.name.as_str())
        .collect::<Vec<_>>()
        .join("-");
    let mut key: String = joined
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(MAX_TAG_LEN)
        .collect();
    // Tags may not start with a period or dash.
    if !key.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
        key.insert(0, '_');
        key.truncate(MAX_TAG_LEN);
    }
    key
}

/// Services to leave out of a release, read from a separate file so that CI can switch them off
/// without touching the main configuration.
#[derive(Debug, Default, Deserialize)]
pub struct ExcludedServices {
    #[serde(default)]
    pub services: Vec<String>,
}

impl ExcludedServices {
    /// A missing file excludes nothing.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        read_yaml(path)
    }

    pub fn filter(&self, units: Vec<ServiceUnit>) -> Vec<ServiceUnit> {
        units
            .into_iter()
            .filter(|unit| !self.services.contains(&unit.name))
            .collect()
    }
}

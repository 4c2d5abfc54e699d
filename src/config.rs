//! Application configuration (spec.md §4.9, ambient stack): layers a TOML
//! defaults file with `CICD_PILOT_*` environment overrides through the
//! `config` crate, the way a config-driven service's settings loader
//! typically composes `config::File` and `config::Environment` sources.

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};
use crate::runner::ResourceLimits;

/// Where pipeline manifests are fetched from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestSourceConfig {
    Git {
        repo_url: String,
        #[serde(default = "default_pipelines_path")]
        pipelines_path: String,
        #[serde(default = "default_branch")]
        branch: String,
        #[serde(default)]
        token: Option<String>,
    },
    Local {
        directory: String,
    },
}

fn default_pipelines_path() -> String {
    "pipelines".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_docker_base_url")]
    pub base_url: String,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_docker_base_url() -> String {
    "http://localhost:2375".to_string()
}

fn default_memory_limit() -> String {
    "512m".to_string()
}

fn default_cpu_limit() -> f64 {
    0.5
}

fn default_pool_size() -> usize {
    crate::runner::DEFAULT_POOL_SIZE
}

impl DockerConfig {
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory: self.memory_limit.clone(),
            cpu: self.cpu_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_path")]
    pub log_path: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_path() -> String {
    "cicd-pilot.log".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SidecarConfig {
    #[serde(default = "default_sidecar_dir")]
    pub directory: String,
}

fn default_sidecar_dir() -> String {
    "data".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Root configuration, assembled at startup and injected into every
/// collaborator rather than read from a hidden global (spec.md §9).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub manifest_source: ManifestSourceConfig,
    #[serde(default = "DockerConfig::default_section")]
    pub docker: DockerConfig,
    #[serde(default = "LoggingConfig::default_section")]
    pub logging: LoggingConfig,
    #[serde(default = "SidecarConfig::default_section")]
    pub sidecar: SidecarConfig,
    #[serde(default = "ServerConfig::default_section")]
    pub server: ServerConfig,
}

impl DockerConfig {
    fn default_section() -> Self {
        Self {
            base_url: default_docker_base_url(),
            memory_limit: default_memory_limit(),
            cpu_limit: default_cpu_limit(),
            pool_size: default_pool_size(),
        }
    }
}

impl LoggingConfig {
    fn default_section() -> Self {
        Self { log_path: default_log_path(), level: default_log_level() }
    }
}

impl SidecarConfig {
    fn default_section() -> Self {
        Self { directory: default_sidecar_dir() }
    }
}

impl ServerConfig {
    fn default_section() -> Self {
        Self { bind_addr: default_bind_addr() }
    }
}

impl AppConfig {
    /// Loads `config/default.toml` (if present), then a path-specific file
    /// named by `CICD_PILOT_CONFIG_FILE` (if set), then `CICD_PILOT_*`
    /// environment variables, in ascending priority.
    pub fn load() -> ConfigResult<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Ok(extra) = std::env::var("CICD_PILOT_CONFIG_FILE") {
            builder = builder.add_source(config::File::with_name(&extra).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CICD_PILOT")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder.build()?;
        let app: AppConfig = raw.try_deserialize()?;

        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> ConfigResult<()> {
        match &self.manifest_source {
            ManifestSourceConfig::Git { repo_url, .. } if repo_url.trim().is_empty() => {
                Err(ConfigError::MissingSection("manifest_source.repo_url".into()))
            }
            ManifestSourceConfig::Local { directory } if directory.trim().is_empty() => {
                Err(ConfigError::MissingSection("manifest_source.directory".into()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_config_defaults_match_spec_limits() {
        let docker = DockerConfig::default_section();
        assert_eq!(docker.limits().memory, "512m");
        assert_eq!(docker.limits().cpu, 0.5);
    }
}

//! YAML configuration loading with environment-variable substitution.
//!
//! Config files are optional - if none of the default paths exist and no explicit path was
//! given, [`load`] returns [`Config::default`] rather than failing startup. Every value can
//! reference an environment variable with `${VAR}` or `${VAR:-default}` syntax, substituted
//! into the raw file text before it is parsed as YAML.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::plan::Policy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub provider: ProviderConfig,
    pub registry: RegistryConfig,
    pub controller: ControllerSettings,
    pub domains: DomainsConfig,
    pub logging: LoggingConfig,
}
impl Default for Config {
    fn default() -> Self {
        Config {
            source: SourceConfig::default(),
            provider: ProviderConfig::default(),
            registry: RegistryConfig::default(),
            controller: ControllerSettings::default(),
            domains: DomainsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    pub label_prefix: String,
    /// `key`, `key=value`, or empty for "no filter".
    pub label_filter: String,
}
impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            label_prefix: "sherpa.dns".to_string(),
            label_filter: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Cloudflare,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: ProviderKind,
    pub cloudflare: CloudflareConfig,
}
impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            name: ProviderKind::Cloudflare,
            cloudflare: CloudflareConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CloudflareConfig {
    pub api_token: Option<String>,
    pub proxied_by_default: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    Txt,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct RegistryConfig {
    #[serde(rename = "type")]
    pub kind: RegistryKind,
    pub txt_prefix: String,
    pub txt_owner_id: String,
    pub txt_wildcard_replacement: String,
    pub encrypt: bool,
    pub encryption_key: Option<String>,
}
impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            kind: RegistryKind::Txt,
            txt_prefix: "sherpa-dns-".to_string(),
            txt_owner_id: "default".to_string(),
            txt_wildcard_replacement: "star".to_string(),
            encrypt: false,
            encryption_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerSettings {
    /// Duration grammar `<digits><s|m|h|d>`, parsed by [`crate::cleanup::parse_delay`].
    pub interval: String,
    pub once: bool,
    pub dry_run: bool,
    pub cleanup_on_stop: bool,
    pub cleanup_delay: String,
    pub policy: PolicyConfig,
}
impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            interval: "60s".to_string(),
            once: false,
            dry_run: false,
            cleanup_on_stop: true,
            cleanup_delay: "15m".to_string(),
            policy: PolicyConfig::Sync,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyConfig {
    CreateOnly,
    Upsert,
    Sync,
}
impl From<PolicyConfig> for Policy {
    fn from(p: PolicyConfig) -> Self {
        match p {
            PolicyConfig::CreateOnly => Policy::CreateOnly,
            PolicyConfig::Upsert => Policy::Upsert,
            PolicyConfig::Sync => Policy::Sync,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DomainsConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}
impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

/// Paths checked in order when no explicit config path is given. First existing file wins.
fn default_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./sherpa-dns.yaml"),
        PathBuf::from("./sherpa-dns.yml"),
        PathBuf::from("/etc/sherpa-dns/sherpa-dns.yaml"),
        PathBuf::from("/etc/sherpa-dns/config.yaml"),
    ]
}

/// Loads configuration from `explicit_path` if given, else the first existing default path,
/// else built-in defaults. Environment variables referenced in the file as `${VAR}` or
/// `${VAR:-default}` are substituted before YAML parsing.
pub fn load(explicit_path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match explicit_path {
        Some(p) => Some(p.to_path_buf()),
        None => default_paths().into_iter().find(|p| p.exists()),
    };

    let Some(path) = path else {
        return Ok(Config::default());
    };

    let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
        path: path.clone(),
        source: e,
    })?;
    let substituted = substitute_env(&raw);
    serde_yaml::from_str(&substituted).map_err(|e| ConfigError::Parse { path, source: e })
}

fn substitute_env(raw: &str) -> String {
    let pattern = Regex::new(r"\$\{([^}]+)\}").expect("static regex is valid");
    pattern
        .replace_all(raw, |caps: &regex::Captures| {
            let expr = &caps[1];
            match expr.split_once(":-") {
                Some((var, default)) => std::env::var(var).unwrap_or_else(|_| default.to_string()),
                None => std::env::var(expr).unwrap_or_default(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/sherpa-dns.yaml"))).is_err());
    }

    #[test]
    fn missing_default_config_falls_back_to_defaults() {
        assert_eq!(load(None).unwrap(), Config::default());
    }

    #[test]
    fn substitute_env_applies_default_when_var_unset() {
        std::env::remove_var("SHERPA_DNS_TEST_VAR_UNSET");
        let out = substitute_env("token: ${SHERPA_DNS_TEST_VAR_UNSET:-fallback}");
        assert_eq!(out, "token: fallback");
    }

    #[test]
    fn substitute_env_prefers_set_variable_over_default() {
        std::env::set_var("SHERPA_DNS_TEST_VAR_SET", "from-env");
        let out = substitute_env("token: ${SHERPA_DNS_TEST_VAR_SET:-fallback}");
        assert_eq!(out, "token: from-env");
        std::env::remove_var("SHERPA_DNS_TEST_VAR_SET");
    }

    #[test]
    fn substitute_env_without_default_becomes_empty_when_unset() {
        std::env::remove_var("SHERPA_DNS_TEST_VAR_NO_DEFAULT");
        let out = substitute_env("token: ${SHERPA_DNS_TEST_VAR_NO_DEFAULT}");
        assert_eq!(out, "token: ");
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.source.label_prefix, "sherpa.dns");
        assert_eq!(config.controller.interval, "60s");
        assert_eq!(config.controller.cleanup_delay, "15m");
        assert!(config.controller.cleanup_on_stop);
        assert!(config.domains.include.is_empty());
    }
}

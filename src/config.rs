//! Gateway configuration, read from a YAML file.
//!
//! ```yaml
//! serviceList:
//!   - name: App 1
//!     url: http://127.0.0.1:8900/graphql
//!     schemaFile: schemas/app1.graphql
//!   - name: App 2
//!     url: http://127.0.0.1:8901/graphql
//! introspectionHeaders:
//!   Authorization: Bearer abc123
//! pollIntervalMs: 30000
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, RegistryError};
use crate::retry::RetryPolicy;

const DEFAULT_NODE_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GatewayConfig {
    pub service_list: Vec<ServiceConfig>,
    /// Sent only when fetching subgraph schemas, never on query traffic.
    #[serde(default)]
    pub introspection_headers: BTreeMap<String, String>,
    /// Re-fetch subgraph schemas on this interval when set.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub ownership: OwnershipConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Directory relative schema files are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub owned_types: Option<Vec<String>>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// SDL file; when absent the schema is fetched from the subgraph itself.
    #[serde(default)]
    pub schema_file: Option<PathBuf>,
}

/// How the planner settles types or fields claimed by several subgraphs.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OwnershipPolicy {
    /// The subgraph registered first wins.
    #[default]
    FirstRegistered,
    /// Overlaps without a precedence entry are planning errors.
    Strict,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OwnershipConfig {
    #[serde(default)]
    pub policy: OwnershipPolicy,
    /// `Type` or `Type.field` to the subgraph that should serve it.
    #[serde(default)]
    pub precedence: BTreeMap<String, String>,
}

fn default_node_timeout_ms() -> u64 {
    DEFAULT_NODE_TIMEOUT_MS
}

fn default_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 4000))
}

impl GatewayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "reading gateway configuration");
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&contents)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_list.is_empty() {
            return Err(ConfigError::Invalid("serviceList must not be empty".to_string()));
        }
        let mut names = BTreeSet::new();
        for service in &self.service_list {
            if !names.insert(service.name.as_str()) {
                return Err(RegistryError::DuplicateName(service.name.clone()).into());
            }
        }
        if self.poll_interval_ms == Some(0) {
            return Err(ConfigError::Invalid("pollIntervalMs must be positive".to_string()));
        }
        if self.node_timeout_ms == 0 {
            return Err(ConfigError::Invalid("nodeTimeoutMs must be positive".to_string()));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("requestTimeoutMs must be positive".to_string()));
        }
        self.retry.validate()?;
        Ok(())
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }

    pub fn schema_path(&self, service: &ServiceConfig) -> Option<PathBuf> {
        service
            .schema_file
            .as_ref()
            .map(|file| self.base_dir.join(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = GatewayConfig::from_yaml(
            r#"
serviceList:
  - name: App 2
    url: http://127.0.0.1:8901/graphql
  - name: App 1
    url: http://127.0.0.1:8900/graphql
introspectionHeaders:
  Authorization: Bearer abc123
"#,
        )
        .unwrap();

        assert_eq!(config.service_list.len(), 2);
        assert_eq!(config.service_list[0].name, "App 2");
        assert_eq!(
            config.introspection_headers.get("Authorization").map(String::as_str),
            Some("Bearer abc123")
        );
        assert_eq!(config.poll_interval(), None);
        assert_eq!(config.node_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry, RetryPolicy::None);
        assert_eq!(config.ownership.policy, OwnershipPolicy::FirstRegistered);
        assert_eq!(config.listen, "0.0.0.0:4000".parse().unwrap());
    }

    #[test]
    fn parses_full_config() {
        let config = GatewayConfig::from_yaml(
            r#"
serviceList:
  - name: users
    url: http://users/graphql
    ownedTypes: [User]
    headers:
      x-api-key: secret
    schemaFile: schemas/users.graphql
pollIntervalMs: 5000
nodeTimeoutMs: 250
requestTimeoutMs: 2000
listen: 127.0.0.1:8080
ownership:
  policy: strict
  precedence:
    User: users
retry:
  policy: exponentialBackoff
  maxRetries: 3
  initialDelayMs: 50
  maxDelayMs: 400
"#,
        )
        .unwrap();

        let users = &config.service_list[0];
        assert_eq!(users.owned_types, Some(vec!["User".to_string()]));
        assert_eq!(users.headers.get("x-api-key").map(String::as_str), Some("secret"));
        assert_eq!(config.poll_interval(), Some(Duration::from_secs(5)));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.ownership.policy, OwnershipPolicy::Strict);
        assert_eq!(
            config.retry,
            RetryPolicy::ExponentialBackoff {
                max_retries: 3,
                initial_delay_ms: 50,
                max_delay_ms: 400,
                multiplier: 2.0,
            }
        );
    }

    #[test]
    fn duplicate_service_names_fail_fast() {
        let err = GatewayConfig::from_yaml(
            r#"
serviceList:
  - { name: a, url: "http://a/graphql" }
  - { name: a, url: "http://b/graphql" }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Registry(RegistryError::DuplicateName(name)) if name == "a"));
    }

    #[test]
    fn service_list_is_required() {
        assert!(matches!(
            GatewayConfig::from_yaml("pollIntervalMs: 10"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(matches!(
            GatewayConfig::from_yaml("serviceList: []"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn schema_files_resolve_against_the_config_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        fs::write(
            &path,
            "serviceList:\n  - { name: a, url: \"http://a/graphql\", schemaFile: a.graphql }\n",
        )
        .unwrap();

        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(
            config.schema_path(&config.service_list[0]),
            Some(dir.path().join("a.graphql"))
        );
    }
}

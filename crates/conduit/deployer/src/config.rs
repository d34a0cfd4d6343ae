//! Deployer configuration

use crate::error::{DeployerError, Result};
use crate::tiers::PlatformLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Deployer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// Name recorded in owner tags
    pub deployer_name: String,

    /// Id recorded in owner tags
    pub deployer_id: Option<String>,

    /// Region used when a session carries none
    pub region: Option<String>,

    pub service_name_prefix: String,
    pub secret_name_prefix: String,
    pub scaling_policy_prefix: String,

    /// Store sensitive variables in the secret store instead of plaintext
    pub use_secret_store: bool,

    /// Role granting the platform access to a private image registry
    pub access_role: Option<String>,

    /// Role assumed by running instances, needed to read secrets
    pub instance_role: Option<String>,

    /// Log groups are `{prefix}/{service_name}/service`
    pub log_group_prefix: String,

    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// Default deprovision timeout
    #[serde(with = "duration_serde")]
    pub operation_timeout: Duration,

    /// Hosts of public image registries
    pub public_registry_hosts: Vec<String>,

    /// Host suffixes of private image registries
    pub private_registry_hosts: Vec<String>,

    pub limits: PlatformLimits,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            deployer_name: "conduit".into(),
            deployer_id: None,
            region: None,
            service_name_prefix: "conduit-".into(),
            secret_name_prefix: "conduit-".into(),
            scaling_policy_prefix: "conduit-".into(),
            use_secret_store: true,
            access_role: None,
            instance_role: None,
            log_group_prefix: "/aws/apprunner".into(),
            poll_interval: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(600),
            public_registry_hosts: vec!["public.ecr.aws".into()],
            private_registry_hosts: vec!["amazonaws.com".into()],
            limits: PlatformLimits::default(),
        }
    }
}

impl DeployerConfig {
    /// Load configuration from a TOML file; a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DeployerError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| DeployerError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(DeployerError::Configuration(
                "poll_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DeployerConfig::default();
        assert!(config.use_secret_store);
        assert!(config.region.is_none());
        assert_eq!(config.limits.max_instances, 1000);
    }

    #[test]
    fn test_load_missing_config() {
        let config = DeployerConfig::load("/nonexistent/path/conduit.toml").unwrap();
        assert_eq!(config, DeployerConfig::default());
    }

    #[test]
    fn test_load_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
deployer_name = "ci"
region = "eu-west-1"
use_secret_store = false
poll_interval = 250

[limits]
max_instances = 50
"#
        )
        .unwrap();

        let config = DeployerConfig::load(file.path()).unwrap();
        assert_eq!(config.deployer_name, "ci");
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert!(!config.use_secret_store);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.limits.max_instances, 50);
        assert_eq!(config.limits.default_max_instances, 25);
        assert_eq!(config.service_name_prefix, "conduit-");
    }

    #[test]
    fn test_invalid_config_is_a_configuration_error() {
        let err = DeployerConfig::from_toml_str("use_secret_store = \"maybe\"").unwrap_err();
        assert!(matches!(err, DeployerError::Configuration(_)));
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let err = DeployerConfig::from_toml_str("poll_interval = 0").unwrap_err();
        assert!(matches!(err, DeployerError::Configuration(_)));
    }
}

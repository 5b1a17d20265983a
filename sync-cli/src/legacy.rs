//! Translation of deprecated flat sync options
//!
//! Older configs describe a single asset target with flat `fog_*` and
//! provider credential keys. They are turned into one `assets` target fed by a
//! local `build` source before the engine sees anything.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{bail, Result};
use multisync::{SourceConfig, TargetConfig};
use serde::Deserialize;

use crate::config::ResolvedConfig;

/// Name of the target created from legacy options
pub const LEGACY_TARGET: &str = "assets";
/// Name of the source created from legacy options
pub const LEGACY_SOURCE: &str = "build";

/// Scalar value of a legacy key
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LegacyValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for LegacyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegacyValue::Bool(value) => write!(f, "{}", value),
            LegacyValue::Int(value) => write!(f, "{}", value),
            LegacyValue::Text(value) => write!(f, "{}", value),
        }
    }
}

/// Every deprecated key the loader still understands
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct LegacyOptions {
    pub fog_provider: Option<String>,
    pub fog_directory: Option<String>,
    pub fog_region: Option<String>,
    pub existing_remote_files: Option<String>,
    pub gzip_compression: Option<LegacyValue>,
    pub after_build: Option<bool>,

    pub aws_access_key_id: Option<LegacyValue>,
    pub aws_secret_access_key: Option<LegacyValue>,
    pub rackspace_username: Option<LegacyValue>,
    pub rackspace_api_key: Option<LegacyValue>,
    pub rackspace_auth_url: Option<LegacyValue>,
    pub google_storage_access_key_id: Option<LegacyValue>,
    pub google_storage_secret_access_key: Option<LegacyValue>,
    pub path_style: Option<LegacyValue>,
}

impl LegacyOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn credentials(&self) -> BTreeMap<String, String> {
        let keys = [
            ("aws_access_key_id", &self.aws_access_key_id),
            ("aws_secret_access_key", &self.aws_secret_access_key),
            ("rackspace_username", &self.rackspace_username),
            ("rackspace_api_key", &self.rackspace_api_key),
            ("rackspace_auth_url", &self.rackspace_auth_url),
            ("google_storage_access_key_id", &self.google_storage_access_key_id),
            ("google_storage_secret_access_key", &self.google_storage_secret_access_key),
            ("path_style", &self.path_style),
        ];

        let mut credentials: BTreeMap<String, String> = keys
            .into_iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| (key.to_string(), v.to_string())))
            .collect();
        if let Some(region) = &self.fog_region {
            credentials.insert("region".to_string(), region.clone());
        }
        credentials
    }

    /// Fold the legacy keys into `config`, recording warnings on it
    pub fn apply(self, config: &mut ResolvedConfig, build_dir: &Path) -> Result<()> {
        config.warnings.push("deprecated sync options detected".to_string());

        if self.gzip_compression.is_some() {
            config
                .warnings
                .push("gzip_compression is no longer supported and is ignored".to_string());
        }

        let credentials = self.credentials();
        match &self.fog_provider {
            Some(provider) => {
                if config.targets.iter().any(|t| t.name == LEGACY_TARGET) {
                    bail!("legacy fog options conflict with an explicit '{}' target", LEGACY_TARGET);
                }

                let mut target = TargetConfig::new(LEGACY_TARGET, provider.clone());
                target.target_dir = self.fog_directory.clone().map(Into::into);
                target.credentials = credentials;
                config.targets.push(target);

                if !config.sources.iter().any(|s| s.name == LEGACY_SOURCE) {
                    config.sources.push(SourceConfig::local(LEGACY_SOURCE, build_dir));
                }
            }
            None if self.fog_directory.is_some() || !credentials.is_empty() => {
                bail!("legacy storage options require fog_provider");
            }
            None => {}
        }

        if let Some(after_build) = self.after_build {
            config.options.run_on_build = after_build;
        }

        match self.existing_remote_files.as_deref() {
            Some("delete") => config.options.delete_abandoned_files = true,
            Some("keep") | Some("ignore") => config.options.delete_abandoned_files = false,
            Some(other) => config
                .warnings
                .push(format!("unknown existing_remote_files value '{}' ignored", other)),
            None => {}
        }

        Ok(())
    }
}

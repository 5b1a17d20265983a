//! Config file loading

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use multisync::config::validate_topology;
use multisync::{EngineOptions, SourceConfig, TargetConfig};
use serde::Deserialize;

use crate::legacy::LegacyOptions;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "multisync.toml";

/// The config file as written by the user
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(flatten)]
    pub options: EngineOptions,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,
    #[serde(flatten)]
    pub legacy: LegacyOptions,
}

/// Command line values that override the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub force: bool,
    pub verbose: bool,
    pub dry_run: bool,
    pub pool_size: Option<usize>,
    pub max_attempts: Option<u32>,
}

/// Normalized configuration handed to the engine
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub options: EngineOptions,
    pub sources: Vec<SourceConfig>,
    pub targets: Vec<TargetConfig>,
    /// Messages produced while translating deprecated options
    pub warnings: Vec<String>,
}

impl FileConfig {
    /// Parse a config file, picking the format from its extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            serde_yaml::from_str(content).with_context(|| format!("invalid YAML in {}", path.display()))
        } else {
            toml::from_str(content).with_context(|| format!("invalid TOML in {}", path.display()))
        }
    }

    /// Translate legacy keys, apply overrides and validate
    pub fn resolve(self, overrides: &Overrides, build_dir: &Path) -> Result<ResolvedConfig> {
        let mut resolved = ResolvedConfig {
            options: self.options,
            sources: self.sources,
            targets: self.targets,
            warnings: Vec::new(),
        };

        if !self.legacy.is_empty() {
            self.legacy.apply(&mut resolved, build_dir)?;
        }

        let options = &mut resolved.options;
        options.force |= overrides.force;
        options.verbose |= overrides.verbose;
        options.dry_run |= overrides.dry_run;
        if let Some(pool_size) = overrides.pool_size {
            options.target_pool_size = Some(pool_size);
        }
        if let Some(max_attempts) = overrides.max_attempts {
            options.max_sync_attempts = max_attempts;
        }

        options.validate()?;
        validate_topology(&resolved.sources, &resolved.targets)?;
        if resolved.targets.is_empty() {
            bail!("no targets configured");
        }

        Ok(resolved)
    }
}

/// Explicit path, or the default file in the working directory
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TOML: &str = r#"
verbose = true
target_pool_size = 4

[[source]]
name = "build"
source_dir = "build"
exclude = ["**/*.map"]

[[target]]
name = "cdn"
type = "local"
target_dir = "/srv/cdn"
destination_dir = "v2"
"#;

    #[test]
    fn test_parse_toml() {
        let config = FileConfig::parse(TOML, Path::new("multisync.toml")).unwrap();
        assert!(config.options.verbose);
        assert_eq!(config.options.target_pool_size, Some(4));
        assert!(config.options.delete_abandoned_files);
        assert_eq!(config.sources[0].kind, "local");
        assert_eq!(config.sources[0].exclude, vec!["**/*.map".to_string()]);
        assert_eq!(config.targets[0].destination_dir.as_deref(), Some("v2"));
        assert!(config.legacy.is_empty());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
max_sync_attempts: 5
source:
  - name: build
    source_dir: build
target:
  - name: backup
    type: memory
"#;
        let config = FileConfig::parse(yaml, Path::new("sync.yml")).unwrap();
        assert_eq!(config.options.max_sync_attempts, 5);
        assert_eq!(config.targets[0].kind, "memory");
    }

    #[test]
    fn test_overrides_win() {
        let config = FileConfig::parse(TOML, Path::new("multisync.toml")).unwrap();
        let overrides = Overrides {
            force: true,
            dry_run: true,
            pool_size: Some(2),
            max_attempts: Some(7),
            ..Default::default()
        };
        let resolved = config.resolve(&overrides, Path::new("build")).unwrap();

        assert!(resolved.options.force);
        assert!(resolved.options.dry_run);
        assert_eq!(resolved.options.target_pool_size, Some(2));
        assert_eq!(resolved.options.max_sync_attempts, 7);
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let config = FileConfig::parse(TOML, Path::new("multisync.toml")).unwrap();
        let overrides = Overrides {
            pool_size: Some(0),
            ..Default::default()
        };
        assert!(config.resolve(&overrides, Path::new("build")).is_err());
    }

    #[test]
    fn test_no_targets_rejected() {
        let config = FileConfig::parse("verbose = false", Path::new("multisync.toml")).unwrap();
        let err = config.resolve(&Overrides::default(), Path::new("build")).unwrap_err();
        assert!(err.to_string().contains("no targets"));
    }

    #[test]
    fn test_load_reports_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "this is = = not toml").unwrap();

        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("invalid TOML"));

        let missing = FileConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(missing.to_string().contains("failed to read config file"));
    }
}

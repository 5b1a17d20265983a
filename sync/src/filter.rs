//! Include/exclude filtering of catalog paths using globset

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// File filter options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    /// Patterns to include (if empty, include all)
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Patterns to exclude; an exclude match always wins
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Case sensitive matching
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
}

fn default_case_sensitive() -> bool {
    true
}

impl FilterOptions {
    /// Build options from include and exclude pattern lists
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include_patterns: include,
            exclude_patterns: exclude,
            case_sensitive: true,
        }
    }
}

/// File filter using globset patterns
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include_set: Option<GlobSet>,
    exclude_set: Option<GlobSet>,
}

impl FileFilter {
    /// Create a new file filter with the given options
    pub fn new(options: &FilterOptions) -> Result<Self> {
        let include_set = if options.include_patterns.is_empty() {
            None
        } else {
            Some(Self::build_globset(&options.include_patterns, options.case_sensitive)?)
        };

        let exclude_set = if options.exclude_patterns.is_empty() {
            None
        } else {
            Some(Self::build_globset(&options.exclude_patterns, options.case_sensitive)?)
        };

        Ok(Self {
            include_set,
            exclude_set,
        })
    }

    /// Filter that lets every path through
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Check if a normalized relative path passes the filter.
    ///
    /// Include patterns are applied first, then exclude patterns.
    pub fn should_include(&self, path: &str) -> bool {
        if let Some(include_set) = &self.include_set {
            if !include_set.is_match(path) {
                return false;
            }
        }

        if let Some(exclude_set) = &self.exclude_set {
            if exclude_set.is_match(path) {
                return false;
            }
        }

        true
    }

    fn build_globset(patterns: &[String], case_sensitive: bool) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            let glob = globset::GlobBuilder::new(pattern)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|e| {
                    SyncError::FilterPattern(format!("Failed to compile glob '{}': {}", pattern, e))
                })?;

            builder.add(glob);
        }

        builder.build().map_err(|e| {
            SyncError::FilterPattern(format!("Failed to build globset: {}", e))
        })
    }
}

/// Validate a single glob pattern without building a filter
pub fn validate_pattern(pattern: &str) -> Result<()> {
    Glob::new(pattern)
        .map(|_| ())
        .map_err(|e| SyncError::FilterPattern(format!("Invalid glob '{}': {}", pattern, e)))
}

//! Site configuration module.
//!
//! A site is described by a single `site.toml`. The build reads it once and
//! treats it as immutable for the rest of the run.
//!
//! ## Configuration Options
//!
//! ```toml
//! [global]
//! layout = "_layout.html"       # Default layout for every page (optional)
//!
//! [global.data]                 # Literal values, available as `global.*`
//! site_name = "Example"
//!
//! [global.fetch]                # key = source; fetched text lands in `global.<key>`
//! readme = "content/readme.md"
//!
//! [[pages]]
//! template = "index.html"       # Relative to the template directory
//! output = "index.html"         # Relative to the output directory
//! layout = ""                   # Per-page override; "" falls back to global.layout
//!
//! [pages.data]                  # Available as `page.*`
//! title = "Home"
//!
//! [pages.fetch]
//! news = "https://example.com/news.txt"
//!
//! [[static.pipelines]]
//! match = "*.css"               # Glob; with a '/' it matches the relative path
//! commands = ["cp {{.Src}} {{.Dest}}"]
//!
//! [processing]
//! max_processes = 4             # Parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early. Validation also rejects
//! page outputs that would escape the output directory and pages that write
//! to the same output path.

use crate::paths::normalize_relative;
use crate::pattern::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Literal template data: string keys to arbitrary structured values.
pub type DataMap = BTreeMap<String, serde_json::Value>;

/// Fetch directives: template key to source (filesystem path or URL).
pub type FetchMap = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{0}")]
    Validation(String),
}

/// Site configuration loaded from `site.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub global: GlobalConfig,
    pub pages: Vec<PageConfig>,
    #[serde(rename = "static")]
    pub assets: StaticConfig,
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// Layout template used by pages that do not set their own.
    pub layout: String,
    pub data: DataMap,
    pub fetch: FetchMap,
}

/// One rendered page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PageConfig {
    pub template: String,
    pub output: String,
    pub layout: String,
    pub data: DataMap,
    pub fetch: FetchMap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticConfig {
    /// Checked in order; the first matching pipeline handles a file.
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(rename = "match")]
    pub pattern: String,
    /// Command templates run in order through the shell.
    pub commands: Vec<String>,
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers for pages and static files.
    /// When absent, defaults to the number of CPU cores.
    pub max_processes: Option<usize>,
}

impl SiteConfig {
    /// Check everything the build relies on but the TOML schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        let mut outputs: HashMap<PathBuf, usize> = HashMap::new();
        for (i, page) in self.pages.iter().enumerate() {
            if page.template.is_empty() {
                return invalid(format!("pages[{i}]: template is required"));
            }
            if page.output.is_empty() {
                return invalid(format!("pages[{i}]: output is required"));
            }
            if normalize_relative(&page.template).is_none() {
                return invalid(format!(
                    "pages[{i}]: template path must stay inside the template directory: {}",
                    page.template
                ));
            }
            let Some(output) = normalize_relative(&page.output) else {
                return invalid(format!(
                    "pages[{i}]: output path must not escape output directory: {}",
                    page.output
                ));
            };
            if let Some(first) = outputs.insert(output, i) {
                return invalid(format!(
                    "pages[{i}]: output {} is already written by pages[{first}]",
                    page.output
                ));
            }
        }

        for (i, pipeline) in self.assets.pipelines.iter().enumerate() {
            if pipeline.pattern.is_empty() {
                return invalid(format!("static.pipelines[{i}]: match pattern is required"));
            }
            if let Err(err) = Pattern::new(&pipeline.pattern) {
                return invalid(format!("static.pipelines[{i}]: {err}"));
            }
            if pipeline.commands.is_empty() {
                return invalid(format!(
                    "static.pipelines[{i}]: pipeline must have at least one command"
                ));
            }
        }

        if self.processing.max_processes == Some(0) {
            return invalid("processing.max_processes must be at least 1".into());
        }

        Ok(())
    }
}

/// Resolve the effective worker count.
///
/// - explicit override (CLI `--jobs`) wins
/// - then `processing.max_processes`
/// - otherwise the number of available cores
pub fn effective_threads(config: &ProcessingConfig, override_jobs: Option<usize>) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    override_jobs
        .or(config.max_processes)
        .unwrap_or(cores)
        .max(1)
}

/// Parse a `site.toml` document and validate it.
pub fn parse_config(content: &str) -> Result<SiteConfig, ConfigError> {
    let config: SiteConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<SiteConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Returns a fully-commented stock `site.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# pagewright site configuration
# ============================
# Directories default to siblings of this file:
#   templates/  page templates and shared `_*.html` layouts/partials
#   static/     assets copied (or piped) into the output
#   public/     the generated site

# ---------------------------------------------------------------------------
# Global scope: visible to every page as `global.*`
# ---------------------------------------------------------------------------
[global]
# Default layout. A page template fills its `{% block content %}`.
layout = "_layout.html"

[global.data]
site_name = "My Site"

# Fetched sources become strings under the same key. Sources are file paths
# (relative to this file) or http:// / https:// URLs. Any failure stops the build.
[global.fetch]
# readme = "content/readme.md"

# ---------------------------------------------------------------------------
# Pages: one entry per generated file, visible as `page.*`
# ---------------------------------------------------------------------------
[[pages]]
template = "index.html"
output = "index.html"

[pages.data]
title = "Home"

# [pages.fetch]
# news = "https://example.com/news.txt"

# ---------------------------------------------------------------------------
# Static pipelines: first matching pattern wins, unmatched files are copied.
# Command fields: {{.Src}} {{.Dest}} {{.Dir}} {{.Name}} {{.Ext}} {{.Base}}
# ---------------------------------------------------------------------------
# [[static.pipelines]]
# match = "*.css"
# commands = ["cp {{.Src}} {{.Dest}}"]

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers. Omit to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}

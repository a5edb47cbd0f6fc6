//! Build orchestration.
//!
//! One call to [`build`] turns a `site.toml` into a finished output tree:
//!
//! ```text
//! 1. load config           site.toml → SiteConfig (validated)
//! 2. clean (optional)      rm -r <output>
//! 3. deadline              one CancelToken for everything below
//! 4. prefetch              every distinct fetch source, in parallel
//! 5. global scope          [global.data] + [global.fetch]
//! 6. pages                 one job per page, in parallel
//! 7. static                pipelines / copies, in parallel
//! ```
//!
//! Each phase runs only if the previous one succeeded, and within a phase
//! the first failing job cancels its siblings. Files already written stay
//! on disk.
//!
//! ## Directory defaults
//!
//! Unless overridden, directories are siblings of the config file:
//!
//! ```text
//! site/
//! ├── site.toml
//! ├── templates/    page templates + shared _*.html
//! ├── static/       assets (optional)
//! └── public/       output
//! ```

use crate::cancel::CancelToken;
use crate::config::{self, ConfigError, DataMap, SiteConfig};
use crate::fetch::{FetchError, Fetcher};
use crate::group::TaskGroup;
use crate::output::BuildEvent;
use crate::paths::{normalize_relative, to_slash};
use crate::pipeline::{self, PipelineError, StaticSummary};
use crate::render::{self, RenderError, StaticFileInfo, StaticInventory, TemplateData};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Deadline applied when the caller does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on concurrent fetches during prefetch.
const MAX_PARALLEL_FETCHES: usize = 32;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("load config: {0}")]
    Config(#[from] ConfigError),
    #[error("clean {}: {source}", path.display())]
    Clean {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),
    #[error("build pages: {0}")]
    Render(#[from] RenderError),
    #[error("process static: {0}")]
    Static(#[from] PipelineError),
    #[error("page output {path} is also a static file")]
    OutputConflict { path: String },
    #[error("start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// What one build invocation should do.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub config_path: PathBuf,
    pub template_dir: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    /// Deadline for the whole build; [`DEFAULT_TIMEOUT`] when unset.
    pub timeout: Option<Duration>,
    /// Remove the output directory before building.
    pub clean: bool,
    /// Worker override; falls back to `processing.max_processes`, then cores.
    pub jobs: Option<usize>,
}

impl BuildOptions {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            template_dir: None,
            static_dir: None,
            output_dir: None,
            timeout: None,
            clean: false,
            jobs: None,
        }
    }

    /// Directory holding the config file; relative fetch sources resolve here.
    pub fn site_dir(&self) -> PathBuf {
        match self.config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn dirs(&self) -> SiteDirs {
        let site = self.site_dir();
        let or_default = |dir: &Option<PathBuf>, name: &str| {
            dir.clone().unwrap_or_else(|| site.join(name))
        };
        SiteDirs {
            templates: or_default(&self.template_dir, "templates"),
            assets: or_default(&self.static_dir, "static"),
            output: or_default(&self.output_dir, "public"),
            site: site.clone(),
        }
    }
}

/// Resolved input and output locations for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteDirs {
    pub site: PathBuf,
    pub templates: PathBuf,
    pub assets: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub pages: usize,
    /// Distinct fetch sources resolved.
    pub sources: usize,
    pub static_files: StaticSummary,
}

/// Load `options.config_path` and build the site it describes.
pub fn build(
    options: &BuildOptions,
    events: Option<&Sender<BuildEvent>>,
) -> Result<BuildSummary, BuildError> {
    let config = config::load_config(&options.config_path)?;
    build_site(&config, options, events)
}

/// Build from an already loaded configuration.
pub fn build_site(
    config: &SiteConfig,
    options: &BuildOptions,
    events: Option<&Sender<BuildEvent>>,
) -> Result<BuildSummary, BuildError> {
    let started = Instant::now();
    let emit = |event: BuildEvent| {
        if let Some(tx) = events {
            tx.send(event).ok();
        }
    };

    let dirs = options.dirs();
    let jobs = config::effective_threads(&config.processing, options.jobs);
    emit(BuildEvent::Started {
        config: options.config_path.clone(),
        output: dirs.output.clone(),
        pages: config.pages.len(),
        jobs,
    });

    if options.clean {
        clean_output(&dirs.output)?;
        emit(BuildEvent::Cleaned {
            output: dirs.output.clone(),
        });
    }

    let cancel = CancelToken::with_timeout(options.timeout.unwrap_or(DEFAULT_TIMEOUT));

    // Prefetch so that every later lookup is a cache hit.
    let fetcher = Fetcher::new(&dirs.site)?;
    let sources = collect_sources(config);
    emit(BuildEvent::FetchQueued {
        sources: sources.len(),
    });
    if !sources.is_empty() {
        let fetch_group = TaskGroup::new(sources.len().min(MAX_PARALLEL_FETCHES))?;
        fetcher.prefetch(&fetch_group, &cancel, &sources, events)?;
    }

    let global = merge_fetched(&config.global.data, fetcher.fetch_map(&cancel, &config.global.fetch)?);

    let assets = static_inventory(&dirs.assets)?;
    check_output_conflicts(config, &assets)?;

    let group = TaskGroup::new(jobs)?;
    emit(BuildEvent::PagesQueued {
        pages: config.pages.len(),
    });
    group.try_for_each(&cancel, &config.pages, |page, token| {
        let fetched = fetcher
            .fetch_map(token, &page.fetch)
            .map_err(|source| RenderError::Fetch {
                output: page.output.clone(),
                source,
            })?;
        let page_data = merge_fetched(&page.data, fetched);
        let data = TemplateData {
            global: &global,
            page: &page_data,
            assets: &assets,
        };
        render::render_page(&dirs.templates, page, &config.global.layout, &data, &dirs.output)?;
        emit(BuildEvent::PageRendered {
            template: page.template.clone(),
            output: page.output.clone(),
            layout: render::select_layout(page, &config.global.layout).map(str::to_string),
        });
        Ok::<(), RenderError>(())
    })?;

    emit(BuildEvent::StaticQueued { files: assets.len() });
    let static_files = pipeline::process_static(
        &dirs.assets,
        &dirs.output,
        &config.assets.pipelines,
        &group,
        &cancel,
        events,
    )?;

    let summary = BuildSummary {
        pages: config.pages.len(),
        sources: sources.len(),
        static_files,
    };
    emit(BuildEvent::Finished {
        summary,
        elapsed: started.elapsed(),
    });
    Ok(summary)
}

fn clean_output(output: &Path) -> Result<(), BuildError> {
    match std::fs::remove_dir_all(output) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BuildError::Clean {
            path: output.to_path_buf(),
            source,
        }),
    }
}

/// Every distinct source named by the global scope or any page, sorted.
pub fn collect_sources(config: &SiteConfig) -> Vec<String> {
    let mut sources = BTreeSet::new();
    sources.extend(config.global.fetch.values().cloned());
    for page in &config.pages {
        sources.extend(page.fetch.values().cloned());
    }
    sources.into_iter().collect()
}

/// Literal data with fetched strings layered on top, key by key.
pub fn merge_fetched(data: &DataMap, fetched: BTreeMap<String, String>) -> DataMap {
    let mut merged = data.clone();
    merged.extend(
        fetched
            .into_iter()
            .map(|(key, content)| (key, serde_json::Value::String(content))),
    );
    merged
}

/// Static files keyed by relative path, as exposed to templates.
pub fn static_inventory(static_root: &Path) -> Result<StaticInventory, PipelineError> {
    Ok(pipeline::collect_static_files(static_root)?
        .into_iter()
        .map(|file| {
            let key = file.key();
            let info = StaticFileInfo {
                path: key.clone(),
                size: file.size,
            };
            (key, info)
        })
        .collect())
}

/// Pages and static files must never write the same output path.
fn check_output_conflicts(config: &SiteConfig, assets: &StaticInventory) -> Result<(), BuildError> {
    for page in &config.pages {
        let Some(output) = normalize_relative(&page.output) else {
            continue;
        };
        let key = to_slash(&output);
        if assets.contains_key(&key) {
            return Err(BuildError::OutputConflict { path: key });
        }
    }
    Ok(())
}

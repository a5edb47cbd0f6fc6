//! Build progress events and their CLI formatting.
//!
//! The orchestrator reports progress as [`BuildEvent`]s over an optional
//! `mpsc` channel. The CLI drains the channel on a printer thread and prints
//! whatever [`format_build_event`] returns; library callers can ignore
//! events entirely by passing no sender.
//!
//! Formatting is pure (no I/O) so every line is unit tested.
//!
//! # Output Format
//!
//! ```text
//! ==> Building 2 pages from site/site.toml → site/public (8 workers)
//!     Cleaned site/public
//! ==> Fetching 2 sources
//!     content/readme.md (1204 bytes)
//!     https://example.com/news.txt (88 bytes)
//! ==> Rendering 2 pages
//!     index.html → index.html
//!         Layout: _layout.html
//!     about.html → about/index.html
//! ==> Processing 3 static files
//!     css/style.css: *.css (2 commands)
//!     js/app.js: copied
//!     robots.txt: copied
//! ==> Built 2 pages, 3 static files (2 copied, 1 piped), 2 sources in 0.41s
//! ```
//!
//! Pages and static files finish in whatever order the workers complete
//! them, so their lines are not sorted.

use crate::build::BuildSummary;
use crate::pipeline::StaticAction;
use std::path::PathBuf;
use std::time::Duration;

/// Progress reported while a build runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    Started {
        config: PathBuf,
        output: PathBuf,
        pages: usize,
        jobs: usize,
    },
    Cleaned {
        output: PathBuf,
    },
    FetchQueued {
        sources: usize,
    },
    Fetched {
        source: String,
        bytes: usize,
    },
    PagesQueued {
        pages: usize,
    },
    PageRendered {
        template: String,
        output: String,
        layout: Option<String>,
    },
    StaticQueued {
        files: usize,
    },
    StaticFile {
        path: String,
        action: StaticAction,
    },
    Finished {
        summary: BuildSummary,
        elapsed: Duration,
    },
}

fn plural(count: usize, one: &str, many: &str) -> String {
    if count == 1 {
        format!("{count} {one}")
    } else {
        format!("{count} {many}")
    }
}

/// Format one event as display lines.
pub fn format_build_event(event: &BuildEvent) -> Vec<String> {
    match event {
        BuildEvent::Started {
            config,
            output,
            pages,
            jobs,
        } => vec![format!(
            "==> Building {} from {} → {} ({})",
            plural(*pages, "page", "pages"),
            config.display(),
            output.display(),
            plural(*jobs, "worker", "workers"),
        )],
        BuildEvent::Cleaned { output } => vec![format!("    Cleaned {}", output.display())],
        BuildEvent::FetchQueued { sources } => {
            vec![format!("==> Fetching {}", plural(*sources, "source", "sources"))]
        }
        BuildEvent::Fetched { source, bytes } => vec![format!("    {source} ({bytes} bytes)")],
        BuildEvent::PagesQueued { pages } => {
            vec![format!("==> Rendering {}", plural(*pages, "page", "pages"))]
        }
        BuildEvent::PageRendered {
            template,
            output,
            layout,
        } => {
            let mut lines = vec![format!("    {template} → {output}")];
            if let Some(layout) = layout {
                lines.push(format!("        Layout: {layout}"));
            }
            lines
        }
        BuildEvent::StaticQueued { files } => vec![format!(
            "==> Processing {}",
            plural(*files, "static file", "static files")
        )],
        BuildEvent::StaticFile { path, action } => match action {
            StaticAction::Copied => vec![format!("    {path}: copied")],
            StaticAction::Piped { pattern, commands } => vec![format!(
                "    {path}: {pattern} ({})",
                plural(*commands, "command", "commands")
            )],
        },
        BuildEvent::Finished { summary, elapsed } => vec![format!(
            "==> Built {}, {} ({} copied, {} piped), {} in {:.2}s",
            plural(summary.pages, "page", "pages"),
            plural(summary.static_files.total(), "static file", "static files"),
            summary.static_files.copied,
            summary.static_files.piped,
            plural(summary.sources, "source", "sources"),
            elapsed.as_secs_f64(),
        )],
    }
}

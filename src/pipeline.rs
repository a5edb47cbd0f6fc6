//! Static asset processing.
//!
//! Every file under the static directory lands at the same relative path in
//! the output directory, either through a pipeline of shell commands or as a
//! plain copy.
//!
//! ## Dispatch
//!
//! Pipelines are checked in declaration order and the first whose `match`
//! pattern fits the file wins. A pattern containing `/` is matched against
//! the path relative to the static root, anything else against the file name
//! alone:
//!
//! ```text
//! match = "*.css"            css/site.css   -> matches (file name)
//! match = "images/*.webp"    images/a.webp  -> matches (relative path)
//! match = "images/*.webp"    a.webp         -> no match
//! ```
//!
//! ## Command fields
//!
//! | Field        | Value for `static/css/site.min.css`   |
//! |--------------|----------------------------------------|
//! | `{{.Src}}`   | `/abs/static/css/site.min.css`         |
//! | `{{.Dest}}`  | `/abs/public/css/site.min.css`         |
//! | `{{.Dir}}`   | `/abs/public/css`                      |
//! | `{{.Name}}`  | `site.min.css`                         |
//! | `{{.Ext}}`   | `.css`                                 |
//! | `{{.Base}}`  | `site.min`                             |
//!
//! Values are substituted verbatim, with no shell quoting. Commands run
//! through `sh -c` one after another, sharing the build's stdout and stderr;
//! the first failing command ends that file's pipeline and the whole phase.
//!
//! Files whose name starts with `.` are skipped; directories such as
//! `.well-known/` are not. A missing static directory is not an error.

use crate::cancel::{CancelToken, Interrupted};
use crate::config::PipelineConfig;
use crate::group::TaskGroup;
use crate::output::BuildEvent;
use crate::paths::to_slash;
use crate::pattern::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::time::Duration;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("static {}: not a directory", .0.display())]
    NotDirectory(PathBuf),
    #[error("stat {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("walk static dir: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("create dir for {rel_path}: {source}")]
    CreateDir {
        rel_path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("copy {rel_path}: {source}")]
    Copy {
        rel_path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command template {template:?}: {reason}")]
    Template { template: String, reason: String },
    #[error("command {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command {command:?}: {status}")]
    CommandFailed { command: String, status: ExitStatus },
    #[error("{0}")]
    Interrupted(#[from] Interrupted),
}

/// A file found under the static root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFile {
    pub path: PathBuf,
    pub rel_path: PathBuf,
    pub size: u64,
}

impl StaticFile {
    /// Forward-slash relative path, used for matching and as a lookup key.
    pub fn key(&self) -> String {
        to_slash(&self.rel_path)
    }
}

/// What happened to one static file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticAction {
    Copied,
    Piped { pattern: String, commands: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticSummary {
    pub copied: usize,
    pub piped: usize,
}

impl StaticSummary {
    pub fn total(&self) -> usize {
        self.copied + self.piped
    }
}

// ============================================================================
// Enumeration
// ============================================================================

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Every file below `static_root` whose name does not start with `.`,
/// sorted by path. Dot-directories are still walked.
///
/// A missing root yields an empty list; a root that is not a directory is
/// an error.
pub fn collect_static_files(static_root: &Path) -> Result<Vec<StaticFile>, PipelineError> {
    let meta = match fs::metadata(static_root) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PipelineError::Stat {
                path: static_root.to_path_buf(),
                source,
            });
        }
    };
    if !meta.is_dir() {
        return Err(PipelineError::NotDirectory(static_root.to_path_buf()));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(static_root)
        .sort_by_file_name()
        .into_iter();
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_dir() || is_hidden(&entry) {
            continue;
        }
        let rel_path = entry
            .path()
            .strip_prefix(static_root)
            .unwrap_or(entry.path())
            .to_path_buf();
        let size = entry.metadata()?.len();
        files.push(StaticFile {
            path: entry.path().to_path_buf(),
            rel_path,
            size,
        });
    }
    Ok(files)
}

// ============================================================================
// Dispatch
// ============================================================================

/// Pipelines with their patterns compiled, in declaration order.
///
/// Malformed patterns never match.
#[derive(Debug)]
pub struct PipelineMatcher<'a> {
    rules: Vec<(Pattern, &'a PipelineConfig)>,
}

impl<'a> PipelineMatcher<'a> {
    pub fn new(pipelines: &'a [PipelineConfig]) -> Self {
        let rules = pipelines
            .iter()
            .filter_map(|p| Pattern::new(&p.pattern).ok().map(|compiled| (compiled, p)))
            .collect();
        Self { rules }
    }

    /// The first pipeline whose pattern matches `rel_path` (forward slashes).
    pub fn find(&self, rel_path: &str) -> Option<&'a PipelineConfig> {
        let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        self.rules
            .iter()
            .find(|(pattern, _)| {
                let subject = if pattern.has_separator() { rel_path } else { name };
                pattern.matches(subject)
            })
            .map(|(_, pipeline)| *pipeline)
    }
}

/// Fields available to command templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandVars {
    pub src: String,
    pub dest: String,
    pub dir: String,
    pub name: String,
    pub ext: String,
    pub base: String,
}

impl CommandVars {
    pub fn new(src: &Path, dest: &Path) -> Self {
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = name.rfind('.').map(|i| name[i..].to_string()).unwrap_or_default();
        let base = name[..name.len() - ext.len()].to_string();
        let dir = dest
            .parent()
            .map(|d| d.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            src: src.to_string_lossy().into_owned(),
            dest: dest.to_string_lossy().into_owned(),
            dir,
            name,
            ext,
            base,
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "Src" => Some(&self.src),
            "Dest" => Some(&self.dest),
            "Dir" => Some(&self.dir),
            "Name" => Some(&self.name),
            "Ext" => Some(&self.ext),
            "Base" => Some(&self.base),
            _ => None,
        }
    }
}

/// Substitute `{{.Field}}` actions in a command template.
///
/// Whitespace inside the braces and `{{-`/`-}}` trim markers are accepted.
pub fn render_command(template: &str, vars: &CommandVars) -> Result<String, PipelineError> {
    let fail = |reason: String| PipelineError::Template {
        template: template.to_string(),
        reason,
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let mut literal = &rest[..start];
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| fail("unclosed action".to_string()))?;
        let mut action = &after[..end];
        rest = &after[end + 2..];

        if let Some(trimmed) = action.strip_prefix('-') {
            literal = literal.trim_end();
            action = trimmed;
        }
        let trim_after = action.ends_with('-');
        if trim_after {
            action = &action[..action.len() - 1];
        }

        out.push_str(literal);
        let action = action.trim();
        let value = action
            .strip_prefix('.')
            .and_then(|field| vars.field(field))
            .ok_or_else(|| fail(format!("unknown field {action:?}")))?;
        out.push_str(value);

        if trim_after {
            rest = rest.trim_start();
        }
    }
    out.push_str(rest);
    Ok(out)
}

// ============================================================================
// Execution
// ============================================================================

fn shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Run one rendered command, killing it if `cancel` fires first.
pub fn run_command(command: &str, cancel: &CancelToken) -> Result<(), PipelineError> {
    cancel.check()?;
    let mut child = shell(command)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| PipelineError::Spawn {
            command: command.to_string(),
            source,
        })?;

    let wait_error = |source| PipelineError::Spawn {
        command: command.to_string(),
        source,
    };
    loop {
        if let Some(status) = child.try_wait().map_err(wait_error)? {
            if status.success() {
                return Ok(());
            }
            return Err(PipelineError::CommandFailed {
                command: command.to_string(),
                status,
            });
        }
        if let Err(stop) = cancel.check() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(stop.into());
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Render and run each command in order, stopping at the first failure.
pub fn run_pipeline(
    pipeline: &PipelineConfig,
    vars: &CommandVars,
    cancel: &CancelToken,
) -> Result<(), PipelineError> {
    for template in &pipeline.commands {
        let command = render_command(template, vars)?;
        run_command(&command, cancel)?;
    }
    Ok(())
}

fn process_file(
    file: &StaticFile,
    output_root: &Path,
    matcher: &PipelineMatcher<'_>,
    cancel: &CancelToken,
) -> Result<StaticAction, PipelineError> {
    let key = file.key();
    let dest = output_root.join(&file.rel_path);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|source| PipelineError::CreateDir {
            rel_path: key.clone(),
            source,
        })?;
    }

    match matcher.find(&key) {
        Some(pipeline) => {
            run_pipeline(pipeline, &CommandVars::new(&file.path, &dest), cancel)?;
            Ok(StaticAction::Piped {
                pattern: pipeline.pattern.clone(),
                commands: pipeline.commands.len(),
            })
        }
        None => {
            fs::copy(&file.path, &dest).map_err(|source| PipelineError::Copy {
                rel_path: key,
                source,
            })?;
            Ok(StaticAction::Copied)
        }
    }
}

/// Process every static file in parallel on `group`.
pub fn process_static(
    static_root: &Path,
    output_root: &Path,
    pipelines: &[PipelineConfig],
    group: &TaskGroup,
    cancel: &CancelToken,
    events: Option<&Sender<BuildEvent>>,
) -> Result<StaticSummary, PipelineError> {
    let absolute = |path: &Path| {
        std::path::absolute(path).map_err(|source| PipelineError::Stat {
            path: path.to_path_buf(),
            source,
        })
    };
    let static_root = absolute(static_root)?;
    let output_root = absolute(output_root)?;

    let files = collect_static_files(&static_root)?;
    let matcher = PipelineMatcher::new(pipelines);
    let copied = AtomicUsize::new(0);
    let piped = AtomicUsize::new(0);

    group.try_for_each(cancel, &files, |file, token| {
        let action = process_file(file, &output_root, &matcher, token)?;
        match action {
            StaticAction::Copied => copied.fetch_add(1, Ordering::Relaxed),
            StaticAction::Piped { .. } => piped.fetch_add(1, Ordering::Relaxed),
        };
        if let Some(tx) = events {
            tx.send(BuildEvent::StaticFile {
                path: file.key(),
                action,
            })
            .ok();
        }
        Ok::<(), PipelineError>(())
    })?;

    Ok(StaticSummary {
        copied: copied.into_inner(),
        piped: piped.into_inner(),
    })
}

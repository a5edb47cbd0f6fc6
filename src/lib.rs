//! # Pagewright
//!
//! A small static site generator driven by one `site.toml`. Pages are Tera
//! templates filled with literal data and with content fetched from local
//! files or HTTP(S) URLs. Static assets are copied as-is or pushed through
//! shell command pipelines chosen by glob pattern.
//!
//! # Architecture: One Build, Four Phases
//!
//! ```text
//! site.toml ─┬─> prefetch   every distinct source, once       (fetch)
//!            ├─> global     literal data + fetched content
//!            ├─> pages      one render job per page          (render)
//!            └─> static     pipeline or copy per asset       (pipeline)
//! ```
//!
//! Phases run in order and stop at the first failure. Inside a phase jobs
//! run in parallel on a bounded pool; the first failing job cancels the
//! rest of its phase and becomes the build's error. A single deadline (30s
//! unless overridden) covers the whole build.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`build`] | Orchestrator: directory defaults, clean, prefetch, pages, static, first error wins |
//! | [`config`] | `site.toml` loading, validation, stock config |
//! | [`fetch`] | Per-build content cache with single-flight resolution of files and URLs |
//! | [`render`] | Page rendering: shared `_*.html` templates, layouts, escaping, raw/markdown filters |
//! | [`pipeline`] | Static asset enumeration, glob dispatch, command templating, shell execution |
//! | [`group`] | Fan-out/fan-in over a bounded worker pool with first-error cancellation |
//! | [`cancel`] | Cancellation tokens: explicit cancel plus a shared deadline |
//! | [`pattern`] | Glob patterns (`*`, `?`, `[...]`) that never cross `/` |
//! | [`paths`] | Lexical containment of configured paths under their root |
//! | [`output`] | Build events and their CLI formatting |
//!
//! # Design Decisions
//!
//! ## Runtime Templates
//!
//! Pages are authored by site owners, so templates are loaded at build time
//! with [Tera](https://keats.github.io/tera/) rather than compiled in. Every
//! page gets a fresh engine holding only the shared templates and its own
//! template, so a broken page template fails that page and nothing else.
//!
//! ## Threads, Not Async
//!
//! All work is blocking I/O (files, HTTP, subprocesses) with modest fan-out.
//! Rayon pools with explicit sizes plus a polled cancellation token keep the
//! control flow synchronous and easy to test. HTTP uses reqwest's blocking
//! client with the remaining deadline as the request timeout.
//!
//! ## Disjoint Outputs
//!
//! Concurrent jobs never write the same file: config validation rejects
//! duplicate page outputs and the orchestrator rejects a page whose output
//! is also a static file before anything is rendered.

pub mod build;
pub mod cancel;
pub mod config;
pub mod fetch;
pub mod group;
pub mod output;
pub mod paths;
pub mod pattern;
pub mod pipeline;
pub mod render;

#[cfg(test)]
pub(crate) mod test_helpers;

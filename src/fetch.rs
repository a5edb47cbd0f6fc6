//! Content fetching with a per-build cache.
//!
//! A *source* is either an `http://`/`https://` URL or a filesystem path
//! (relative paths resolve against the site directory). [`Fetcher::fetch`]
//! turns a source into its text content:
//!
//! 1. A cached source returns immediately, without I/O.
//! 2. Otherwise exactly one resolution runs per source, no matter how many
//!    workers ask for it at once. Concurrent callers join the in-flight
//!    request and all observe its result, success or failure.
//! 3. Successful content is cached under the source string as written.
//!    Different spellings of the same file are different cache entries.
//!    Failures are not cached.
//!
//! The cache belongs to one [`Fetcher`], and one fetcher belongs to one
//! build. Nothing outlives the build.
//!
//! The actual I/O sits behind the [`Resolve`] trait so the caching layer can
//! be tested against a counting stub.

use crate::cancel::{CancelToken, Interrupted};
use crate::group::TaskGroup;
use crate::output::BuildEvent;
use reqwest::StatusCode;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("GET {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: Arc<reqwest::Error>,
    },
    #[error("GET {url}: unexpected status {status}")]
    Status { url: String, status: u16 },
    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("build HTTP client: {0}")]
    Client(#[source] Arc<reqwest::Error>),
    #[error("{0}")]
    Interrupted(#[from] Interrupted),
    #[error("{key}: {source}")]
    Named {
        key: String,
        #[source]
        source: Box<FetchError>,
    },
}

/// Turns one source into text. Implementations do no caching.
pub trait Resolve: Sync + Send {
    fn resolve(&self, source: &str, cancel: &CancelToken) -> Result<String, FetchError>;
}

/// Whether `source` is fetched over the network.
pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

// ============================================================================
// Production resolver
// ============================================================================

/// Resolves URLs with a blocking HTTP client and everything else from disk.
pub struct SourceResolver {
    base_dir: PathBuf,
    client: reqwest::blocking::Client,
}

impl SourceResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(None)
            .user_agent(concat!("pagewright/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Client(Arc::new(e)))?;
        Ok(Self {
            base_dir: base_dir.into(),
            client,
        })
    }

    fn get(&self, url: &str, cancel: &CancelToken) -> Result<String, FetchError> {
        cancel.check()?;
        let mut request = self.client.get(url);
        if let Some(remaining) = cancel.remaining() {
            request = request.timeout(remaining);
        }

        let http_error = |e: reqwest::Error| match cancel.check() {
            Err(stop) => FetchError::Interrupted(stop),
            Ok(()) => FetchError::Http {
                url: url.to_string(),
                source: Arc::new(e),
            },
        };

        let response = request.send().map_err(http_error)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().map_err(http_error)
    }

    fn read(&self, source: &str) -> Result<String, FetchError> {
        let path = self.base_dir.join(source);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => Err(FetchError::Read {
                path,
                source: Arc::new(e),
            }),
        }
    }
}

impl Resolve for SourceResolver {
    fn resolve(&self, source: &str, cancel: &CancelToken) -> Result<String, FetchError> {
        if is_remote(source) {
            self.get(source, cancel)
        } else {
            self.read(source)
        }
    }
}

// ============================================================================
// Cache + single-flight
// ============================================================================

type Flight = Arc<OnceLock<Result<String, FetchError>>>;

#[derive(Default)]
struct FetchState {
    cache: HashMap<String, String>,
    in_flight: HashMap<String, Flight>,
}

pub struct Fetcher<R: Resolve = SourceResolver> {
    resolver: R,
    state: Mutex<FetchState>,
}

impl Fetcher<SourceResolver> {
    /// A fetcher reading relative file sources from `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, FetchError> {
        Ok(Self::with_resolver(SourceResolver::new(base_dir)?))
    }
}

impl<R: Resolve> Fetcher<R> {
    pub fn with_resolver(resolver: R) -> Self {
        Self {
            resolver,
            state: Mutex::new(FetchState::default()),
        }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    fn lock(&self) -> MutexGuard<'_, FetchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Content of `source`, from cache or from a single shared resolution.
    pub fn fetch(&self, source: &str, cancel: &CancelToken) -> Result<String, FetchError> {
        let flight = {
            let mut state = self.lock();
            if let Some(content) = state.cache.get(source) {
                return Ok(content.clone());
            }
            Arc::clone(state.in_flight.entry(source.to_string()).or_default())
        };

        flight
            .get_or_init(|| {
                let result = self.resolver.resolve(source, cancel);
                let mut state = self.lock();
                if let Ok(content) = &result {
                    state.cache.insert(source.to_string(), content.clone());
                }
                state.in_flight.remove(source);
                result
            })
            .clone()
    }

    /// The cached content of `source`, if it has been fetched successfully.
    pub fn cached(&self, source: &str) -> Option<String> {
        self.lock().cache.get(source).cloned()
    }

    pub fn cached_len(&self) -> usize {
        self.lock().cache.len()
    }

    /// Resolve every `key -> source` entry in parallel.
    ///
    /// Either every entry resolves and the full `key -> content` map comes
    /// back, or the first failure is returned naming its key.
    pub fn resolve_fetch_map(
        &self,
        group: &TaskGroup,
        cancel: &CancelToken,
        fetch: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, FetchError> {
        let entries: Vec<(&String, &String)> = fetch.iter().collect();
        let resolved = group.try_map(cancel, &entries, |(key, source), token| {
            self.fetch(source, token)
                .map(|content| ((*key).clone(), content))
                .map_err(|e| e.named(key))
        })?;
        Ok(resolved.into_iter().collect())
    }

    /// Sequential form of [`Fetcher::resolve_fetch_map`], for callers that
    /// already run on a worker and expect cache hits.
    pub fn fetch_map(
        &self,
        cancel: &CancelToken,
        fetch: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, FetchError> {
        fetch
            .iter()
            .map(|(key, source)| {
                self.fetch(source, cancel)
                    .map(|content| (key.clone(), content))
                    .map_err(|e| e.named(key))
            })
            .collect()
    }

    /// Resolve `sources` in parallel so later lookups hit the cache.
    pub fn prefetch(
        &self,
        group: &TaskGroup,
        cancel: &CancelToken,
        sources: &[String],
        events: Option<&Sender<BuildEvent>>,
    ) -> Result<(), FetchError> {
        group.try_for_each(cancel, sources, |source, token| {
            let content = self.fetch(source, token)?;
            if let Some(tx) = events {
                tx.send(BuildEvent::Fetched {
                    source: source.clone(),
                    bytes: content.len(),
                })
                .ok();
            }
            Ok(())
        })
    }
}

impl FetchError {
    fn named(self, key: &str) -> Self {
        FetchError::Named {
            key: key.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through [`FetchError::Named`].
    pub fn root(&self) -> &FetchError {
        match self {
            FetchError::Named { source, .. } => source.root(),
            other => other,
        }
    }
}

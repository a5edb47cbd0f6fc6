//! Shared test utilities for the pagewright test suite.
//!
//! Provides a scratch site builder and a tiny in-process HTTP server for
//! exercising remote fetches without touching the network.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let site = SiteFixture::new();
//! site.template("index.html", "<h1>{{ page.title }}</h1>");
//! site.asset("css/style.css", "body{}");
//!
//! let server = TestServer::start(&[("/news", 200, "breaking")]);
//! let url = server.url("/news");
//! ```

use std::collections::HashMap;
use std::io::{Read as _, Write as _};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

// =========================================================================
// Site fixture
// =========================================================================

/// A temporary site root with `templates/`, `static/` and `public/` beside a
/// `site.toml`, matching the directory defaults of a build.
pub struct SiteFixture {
    tmp: TempDir,
}

impl SiteFixture {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join("site.toml")
    }

    pub fn templates(&self) -> PathBuf {
        self.root().join("templates")
    }

    pub fn assets(&self) -> PathBuf {
        self.root().join("static")
    }

    pub fn public(&self) -> PathBuf {
        self.root().join("public")
    }

    pub fn config(&self, toml: &str) -> &Self {
        write_file(&self.config_path(), toml);
        self
    }

    pub fn template(&self, rel: &str, body: &str) -> &Self {
        write_file(&self.templates().join(rel), body);
        self
    }

    pub fn asset(&self, rel: &str, body: &str) -> &Self {
        write_file(&self.assets().join(rel), body);
        self
    }

    pub fn file(&self, rel: &str, body: &str) -> &Self {
        write_file(&self.root().join(rel), body);
        self
    }

    pub fn read_output(&self, rel: &str) -> String {
        std::fs::read_to_string(self.public().join(rel)).unwrap()
    }
}

/// Write `body` to `path`, creating parent directories.
pub fn write_file(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}

// =========================================================================
// Minimal HTTP server
// =========================================================================

/// Serves fixed `(path, status, body)` routes on a random local port and
/// counts the requests each path receives. Unknown paths get a 404.
pub struct TestServer {
    port: u16,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    total: Arc<AtomicUsize>,
    _stop: Sender<()>,
}

impl TestServer {
    pub fn start(routes: &[(&str, u16, &str)]) -> Self {
        Self::start_with_delay(routes, Duration::ZERO)
    }

    /// Like [`TestServer::start`], but every response is held back by `delay`.
    pub fn start_with_delay(routes: &[(&str, u16, &str)], delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let routes: Arc<HashMap<String, (u16, String)>> = Arc::new(
            routes
                .iter()
                .map(|(path, status, body)| (path.to_string(), (*status, body.to_string())))
                .collect(),
        );
        let hits = Arc::new(Mutex::new(HashMap::new()));
        let total = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel::<()>();

        let server_hits = Arc::clone(&hits);
        let server_total = Arc::clone(&total);
        thread::spawn(move || {
            listener.set_nonblocking(true).unwrap();
            loop {
                if !matches!(rx.try_recv(), Err(mpsc::TryRecvError::Empty)) {
                    break;
                }
                match listener.accept() {
                    Ok((stream, _)) => {
                        let routes = Arc::clone(&routes);
                        let hits = Arc::clone(&server_hits);
                        let total = Arc::clone(&server_total);
                        thread::spawn(move || {
                            serve_request(stream, &routes, &hits, &total, delay)
                        });
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(2));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            port,
            hits,
            total,
            _stop: tx,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

fn serve_request(
    mut stream: TcpStream,
    routes: &HashMap<String, (u16, String)>,
    hits: &Mutex<HashMap<String, usize>>,
    total: &AtomicUsize,
    delay: Duration,
) {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 4096];
    let n = match stream.read(&mut buf) {
        Ok(n) if n > 0 => n,
        _ => return,
    };
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

    *hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;
    total.fetch_add(1, Ordering::SeqCst);

    if !delay.is_zero() {
        thread::sleep(delay);
    }

    let (status, body) = routes
        .get(&path)
        .cloned()
        .unwrap_or((404, "not found".to_string()));
    let reason = if status == 200 { "OK" } else { "Error" };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

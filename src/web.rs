//! HTTP and WebSocket front door.
//!
//! One listener serves both: a request carrying `Upgrade: websocket` (any
//! path) becomes a relay session, everything else is answered by a small
//! router: the status endpoint, the browser client's entry page and static
//! assets from the public directory with embedded fallbacks.

use colored::*;
use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::connector::ConnectorFactory;
use crate::error::RelayError;
use crate::registry::ConnectionRegistry;
use crate::relay::{handle_session, RelayContext};

/// Upper bound on request head size.
const MAX_HEAD_BYTES: usize = 8192;
/// How many times a partial request head is re-peeked before giving up.
const PEEK_RETRIES: usize = 50;
const PEEK_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Browser client shipped inside the binary.
const EMBEDDED_ASSETS: &[(&str, &str)] = &[
    ("index.html", include_str!("../public/index.html")),
    ("app.js", include_str!("../public/app.js")),
    ("style.css", include_str!("../public/style.css")),
];

// ---------------------------------------------------------------------------
// Static assets
// ---------------------------------------------------------------------------

/// Serves files from an optional directory, falling back to the embedded copies.
#[derive(Debug, Clone, Default)]
pub struct StaticAssets {
    root: Option<PathBuf>,
}

impl StaticAssets {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Only the embedded client.
    pub fn embedded() -> Self {
        Self { root: None }
    }

    /// Look up `request_path` (URL path, still percent-encoded).
    ///
    /// `/` maps to `index.html`. Paths that try to leave the asset root
    /// resolve to nothing.
    pub async fn load(&self, request_path: &str) -> Option<(Cow<'static, [u8]>, &'static str)> {
        let relative = sanitize_path(request_path)?;
        let content_type = content_type_for(&relative);

        if let Some(root) = &self.root {
            match tokio::fs::read(root.join(&relative)).await {
                Ok(bytes) => return Some((Cow::Owned(bytes), content_type)),
                Err(e) => debug!(path = %relative.display(), error = %e, "not in public dir"),
            }
        }

        let name = relative.to_str()?;
        EMBEDDED_ASSETS
            .iter()
            .find(|(asset, _)| *asset == name)
            .map(|(_, body)| (Cow::Borrowed(body.as_bytes()), content_type))
    }
}

/// Turn a URL path into a relative file path, rejecting traversal.
pub fn sanitize_path(request_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode(request_path);
    let trimmed = decoded.trim_start_matches('/');
    let trimmed = if trimmed.is_empty() { "index.html" } else { trimmed };
    if trimmed.contains('\\') || trimmed.contains('\0') {
        return None;
    }

    let mut out = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => {
                if part.to_str().is_some_and(|p| p.starts_with('.')) {
                    return None;
                }
                out.push(part);
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "application/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Percent-decoding for URL paths. Invalid escapes are kept verbatim and the
/// result is decoded as UTF-8 (lossily).
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ---------------------------------------------------------------------------
// Responses and routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
    pub extra_headers: Vec<(&'static str, &'static str)>,
}

impl Response {
    fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: Some(content_type),
            body: body.into(),
            extra_headers: Vec::new(),
        }
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(200, "application/json", value.to_string())
    }

    pub fn not_found() -> Self {
        Self::new(404, "text/plain; charset=utf-8", "Not Found")
    }

    pub fn method_not_allowed() -> Self {
        let mut resp = Self::new(405, "text/plain; charset=utf-8", "Method Not Allowed");
        resp.extra_headers.push(("Allow", "GET, OPTIONS"));
        resp
    }

    /// CORS preflight answer.
    pub fn preflight() -> Self {
        Self {
            status: 204,
            content_type: None,
            body: Vec::new(),
            extra_headers: vec![
                ("Access-Control-Allow-Methods", "GET, OPTIONS"),
                ("Access-Control-Allow-Headers", "*"),
                ("Access-Control-Max-Age", "86400"),
            ],
        }
    }

    pub fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            204 => "No Content",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            _ => "Internal Server Error",
        }
    }

    /// Serialize head and body. Every response allows any origin.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason());
        if let Some(ct) = self.content_type {
            head.push_str(&format!("Content-Type: {}\r\n", ct));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Access-Control-Allow-Origin: *\r\n");
        for (name, value) in &self.extra_headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("Connection: close\r\n\r\n");
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Shared state for every connection on the listener.
#[derive(Clone)]
pub struct AppState {
    pub relay: RelayContext,
    pub assets: Arc<StaticAssets>,
}

impl AppState {
    pub fn new(relay: RelayContext, assets: StaticAssets) -> Self {
        Self {
            relay,
            assets: Arc::new(assets),
        }
    }

    pub fn from_config(config: &RelayConfig, factory: Arc<dyn ConnectorFactory>) -> Self {
        Self::new(
            RelayContext::new(ConnectionRegistry::new(), factory),
            StaticAssets::new(config.public_dir.clone()),
        )
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.relay.registry
    }
}

/// Answer one plain HTTP request. `target` may carry a query string.
pub async fn route(method: &str, target: &str, state: &AppState) -> Response {
    let path = target.split(['?', '#']).next().unwrap_or("/");
    match method {
        "OPTIONS" => Response::preflight(),
        "GET" => match path {
            "/api/status" => Response::json(&serde_json::json!({
                "status": "Online",
                "connections": state.registry().len(),
            })),
            _ => match state.assets.load(path).await {
                Some((body, content_type)) => Response::new(200, content_type, body.into_owned()),
                None => Response::not_found(),
            },
        },
        _ => Response::method_not_allowed(),
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// What the first bytes on a connection turned out to be.
#[derive(Debug, PartialEq, Eq)]
enum Incoming {
    Upgrade,
    Plain,
    Garbage,
}

/// Classify a request head without consuming it.
fn classify_head(buf: &[u8]) -> Option<Incoming> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {
            let upgrade = req.headers.iter().any(|h| {
                h.name.eq_ignore_ascii_case("upgrade")
                    && std::str::from_utf8(h.value)
                        .is_ok_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
            });
            Some(if upgrade { Incoming::Upgrade } else { Incoming::Plain })
        }
        Ok(httparse::Status::Partial) => None,
        Err(_) => Some(Incoming::Garbage),
    }
}

async fn peek_head(stream: &TcpStream) -> Result<Incoming, RelayError> {
    let mut buf = vec![0u8; MAX_HEAD_BYTES];
    for _ in 0..PEEK_RETRIES {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Err(RelayError::TransportClosed);
        }
        if let Some(kind) = classify_head(&buf[..n]) {
            return Ok(kind);
        }
        if n == buf.len() {
            return Ok(Incoming::Garbage);
        }
        tokio::time::sleep(PEEK_RETRY_DELAY).await;
    }
    Ok(Incoming::Garbage)
}

async fn read_head(stream: &mut TcpStream) -> Result<Option<(String, String)>, RelayError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(_)) => {
                let method = req.method.unwrap_or("GET").to_string();
                let path = req.path.unwrap_or("/").to_string();
                return Ok(Some((method, path)));
            }
            Ok(httparse::Status::Partial) if buf.len() < MAX_HEAD_BYTES => continue,
            _ => return Ok(None),
        }
    }
}

async fn handle_connection(mut stream: TcpStream, state: AppState) -> Result<(), RelayError> {
    match peek_head(&stream).await? {
        Incoming::Upgrade => {
            let ws = tokio_tungstenite::accept_async(stream).await?;
            handle_session(ws, state.relay.clone()).await;
            Ok(())
        }
        Incoming::Plain => {
            let response = match read_head(&mut stream).await? {
                Some((method, target)) => {
                    let resp = route(&method, &target, &state).await;
                    debug!(%method, %target, status = resp.status, "http");
                    resp
                }
                None => Response::new(400, "text/plain; charset=utf-8", "Bad Request"),
            };
            stream.write_all(&response.to_bytes()).await?;
            stream.shutdown().await?;
            Ok(())
        }
        Incoming::Garbage => {
            let resp = Response::new(400, "text/plain; charset=utf-8", "Bad Request");
            stream.write_all(&resp.to_bytes()).await?;
            Ok(())
        }
    }
}

/// Accept connections forever, one task each.
pub async fn serve_listener(listener: TcpListener, state: AppState) -> Result<(), RelayError> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                warn!(peer = %addr, error = %e, "connection error");
            }
        });
    }
}

/// Bind the configured address and serve until the process ends.
pub async fn serve(config: &RelayConfig, factory: Arc<dyn ConnectorFactory>) -> Result<(), RelayError> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    let local = listener.local_addr()?;
    info!(addr = %local, upstream = %config.upstream.kind, "relay listening");

    eprintln!(
        "{}",
        format!("  Live event relay running at http://localhost:{}", local.port()).bright_green()
    );
    eprintln!("{}", format!("  Upstream: {}", config.upstream.kind).bright_cyan());
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());

    serve_listener(listener, AppState::from_config(config, factory)).await
}

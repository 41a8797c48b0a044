// Copyright 2025 Europa Software
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The HTTP server: an agent plus a handler registry, a per-tick request
//! dispatcher and the filesystem responder.
//!
//! The embedder drives everything by calling
//! [`handle_requests`](HttpServer::handle_requests) in a loop. Each tick
//! adopts and sweeps connections, rescans the webroot when its interval is
//! due, dispatches a request task for every connection with enough pending
//! bytes, and reaps finished tasks. Tasks run on ephemeral threads by
//! default; the `sync-handlers` feature runs them inline on the embedder's
//! thread, with identical responses either way (tasks share nothing
//! mutable).

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use slab::Slab;
use tracing::{debug, info};

use crate::agent::{Agent, AgentMode, ConnectionHandle, ConnectionId};
use crate::http::filesystem::{content_type_for, HttpFilesystem};
use crate::http::parser::{parse_request, probe_request, ProbeStatus, HEADER_TIMEOUT, REQUEST_MIN_LEN};
use crate::http::spa::{make_bootstrap_page, make_dynamic_fragment, SPA_MARKER_HEADER, SPA_MARKER_VALUE};
use crate::http::{HandlerBinding, HttpRequest, HttpResponse, Method, StatusCode};
use crate::settings::{HttpServerSettings, NetAgentSettings};
use crate::tls::{TlsError, TlsSettings};

/// Grace period before a fragment smaller than a minimal request head gets
/// a task dispatched for it anyway; the task then enforces the header
/// budget counted from the fragment's arrival.
const SMALL_REQUEST_DISPATCH_DELAY: Duration = Duration::from_millis(50);

/// Receive poll cadence inside a request task.
const TASK_POLL_DELAY: Duration = Duration::from_millis(10);

/// How long a task waits for an error response to flush before it closes
/// the connection.
const ERROR_FLUSH_BUDGET: Duration = Duration::from_millis(500);

/// Transport selector: plaintext HTTP or TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMode {
    /// Plaintext; default port 80.
    Http,
    /// TLS 1.2; default port 443, requires [`HttpServer::configure_tls`].
    Https,
}

/// How the filesystem handler serves pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeMode {
    /// Classic webserver: every file is returned as-is.
    Static,
    /// Pages load as a single-page application via the bootstrap script;
    /// non-page assets are still served statically.
    Dynamic,
}

#[derive(Debug)]
struct TaskOutcome {
    status: StatusCode,
    request: String,
}

#[derive(Debug)]
enum TaskState {
    Running(thread::JoinHandle<TaskOutcome>),
    Done(TaskOutcome),
}

#[derive(Debug)]
struct RequestTask {
    connection: ConnectionId,
    started: Instant,
    state: TaskState,
}

impl TaskState {
    fn is_finished(&self) -> bool {
        match self {
            TaskState::Running(handle) => handle.is_finished(),
            TaskState::Done(_) => true,
        }
    }

    fn into_outcome(self) -> TaskOutcome {
        match self {
            TaskState::Running(handle) => handle.join().unwrap_or_else(|_| TaskOutcome {
                status: StatusCode::InternalServerError,
                request: "<request task panicked>".to_string(),
            }),
            TaskState::Done(outcome) => outcome,
        }
    }
}

/// HTTP/1.1 server over a [`Agent`] in server mode.
///
/// # Examples
///
/// A minimal API endpoint next to a static webroot:
///
/// ```no_run
/// use netagent::{HttpMode, HttpResponse, HttpServer, Method, ServeMode, StatusCode};
///
/// let mut server = HttpServer::new(HttpMode::Http, ServeMode::Static);
/// server.bind_request_handler(Method::Get, |request| {
///     if request.url != "/hello" {
///         // Let the filesystem handler have it instead.
///         return HttpResponse::unhandled();
///     }
///     let mut response = HttpResponse::with_payload(StatusCode::Ok, "Hello from the server!");
///     response.add_header_field("Content-Type", "text/plain; charset=utf-8");
///     response
/// });
/// server.bind_filesystem_handler("webroot").unwrap();
/// server.start("127.0.0.1", None).unwrap();
/// loop {
///     server.handle_requests();
///     std::thread::sleep(std::time::Duration::from_millis(30));
/// }
/// ```
#[derive(Debug)]
pub struct HttpServer {
    agent: Agent,
    http_mode: HttpMode,
    serve_mode: ServeMode,
    handlers: Vec<Arc<HandlerBinding>>,
    filesystem: Option<Arc<Mutex<HttpFilesystem>>>,
    tasks: Slab<RequestTask>,
    inflight: HashSet<ConnectionId>,
    pending_since: HashMap<ConnectionId, Instant>,
    settings: HttpServerSettings,
    tls_configured: bool,
}

impl HttpServer {
    /// Creates a server. [`HttpMode::Https`] additionally needs
    /// [`configure_tls`](HttpServer::configure_tls) before
    /// [`start`](HttpServer::start).
    pub fn new(http_mode: HttpMode, serve_mode: ServeMode) -> HttpServer {
        let agent_mode = match http_mode {
            HttpMode::Http => AgentMode::Server,
            HttpMode::Https => AgentMode::ServerEncrypted,
        };
        HttpServer {
            agent: Agent::new(agent_mode),
            http_mode,
            serve_mode,
            handlers: Vec::new(),
            filesystem: None,
            tasks: Slab::new(),
            inflight: HashSet::new(),
            pending_since: HashMap::new(),
            settings: HttpServerSettings::default(),
            tls_configured: false,
        }
    }

    /// Loads TLS material for [`HttpMode::Https`].
    pub fn configure_tls(&mut self, settings: TlsSettings) -> Result<(), TlsError> {
        self.agent.configure_tls(settings)?;
        self.tls_configured = true;
        Ok(())
    }

    /// Appends a handler binding. Bindings are walked in registration
    /// order; the first one matching the method whose response reports
    /// `handled` wins.
    pub fn bind_request_handler(
        &mut self,
        method: Method,
        handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) {
        self.handlers.push(Arc::new(HandlerBinding::new(method, handler)));
    }

    /// Scans `webroot` and appends the filesystem handler for all methods.
    /// Serving style follows the server's [`ServeMode`].
    pub fn bind_filesystem_handler(&mut self, webroot: impl AsRef<Path>) -> io::Result<()> {
        let mut filesystem = HttpFilesystem::new();
        filesystem.refresh_full(webroot.as_ref())?;
        let filesystem = Arc::new(Mutex::new(filesystem));
        self.filesystem = Some(filesystem.clone());

        let serve_mode = self.serve_mode;
        self.handlers.push(Arc::new(HandlerBinding::new(
            Method::Any,
            move |request| respond_from_filesystem(&filesystem, serve_mode, request),
        )));
        Ok(())
    }

    /// Replaces both settings snapshots.
    pub fn apply_settings(&mut self, net: NetAgentSettings, http: HttpServerSettings) {
        self.agent.apply_settings(net);
        self.settings = http;
    }

    /// Starts listening. The port defaults to 80 for HTTP and 443 for
    /// HTTPS.
    pub fn start(&mut self, address: &str, port: Option<u16>) -> io::Result<()> {
        if self.http_mode == HttpMode::Https && !self.tls_configured {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "HTTPS server started without TLS configuration",
            ));
        }
        let port = port.unwrap_or(match self.http_mode {
            HttpMode::Http => 80,
            HttpMode::Https => 443,
        });
        self.agent.listen(port, address)
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.agent.local_addr()
    }

    /// The wrapped agent, for connection inspection.
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// The embedder's tick: adopt/sweep connections, rescan the webroot on
    /// its interval, dispatch request tasks and reap finished ones.
    pub fn handle_requests(&mut self) {
        self.agent.update_connections();

        if let Some(filesystem) = &self.filesystem {
            filesystem
                .lock()
                .unwrap()
                .refresh_timed(self.settings.filesystem_refresh_interval());
        }

        // Dispatch: enough bytes for a plausible request head, or a small
        // fragment that has sat long enough to deserve a verdict.
        let now = Instant::now();
        let mut dispatch = Vec::new();
        for connection in self.agent.connections() {
            let id = connection.id();
            if self.inflight.contains(&id) {
                continue;
            }
            let readable = connection.incoming_size();
            if readable == 0 {
                self.pending_since.remove(&id);
                continue;
            }
            let first_seen = *self.pending_since.entry(id).or_insert(now);
            if readable >= REQUEST_MIN_LEN
                || now.duration_since(first_seen) >= SMALL_REQUEST_DISPATCH_DELAY
            {
                debug!(connection = %id, readable, "dispatching request task");
                dispatch.push((connection.handle(), first_seen));
            }
        }
        for (handle, first_seen) in dispatch {
            self.spawn_task(handle, first_seen);
        }

        // Reap finished tasks and log their outcome.
        let finished: Vec<usize> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.state.is_finished())
            .map(|(key, _)| key)
            .collect();
        for key in finished {
            let task = self.tasks.remove(key);
            self.inflight.remove(&task.connection);
            self.pending_since.remove(&task.connection);
            let elapsed_ms = task.started.elapsed().as_millis() as u64;
            let outcome = task.state.into_outcome();
            info!(
                status = %outcome.status,
                request = %outcome.request,
                elapsed_ms,
                "request completed"
            );
        }
    }

    #[cfg(not(feature = "sync-handlers"))]
    fn spawn_task(&mut self, handle: ConnectionHandle, first_seen: Instant) {
        let id = handle.id();
        let handlers = self.handlers.clone();
        let thread = thread::Builder::new()
            .name("http-request".into())
            .spawn(move || run_request_task(handle, handlers, first_seen))
            .expect("failed to spawn request task thread");
        self.track_task(id, first_seen, TaskState::Running(thread));
    }

    #[cfg(feature = "sync-handlers")]
    fn spawn_task(&mut self, handle: ConnectionHandle, first_seen: Instant) {
        let id = handle.id();
        let outcome = run_request_task(handle, self.handlers.clone(), first_seen);
        self.track_task(id, first_seen, TaskState::Done(outcome));
    }

    fn track_task(&mut self, id: ConnectionId, first_seen: Instant, state: TaskState) {
        self.pending_since.remove(&id);
        self.inflight.insert(id);
        self.tasks.insert(RequestTask {
            connection: id,
            started: first_seen,
            state,
        });
    }
}

/// Drives one request on one connection to a response: incremental
/// receive+probe under the header budget, full parse, handler walk,
/// serialize, send. Parse-level failures answer an error page and close
/// the connection; handler-level responses leave it open.
fn run_request_task(
    connection: ConnectionHandle,
    handlers: Vec<Arc<HandlerBinding>>,
    first_seen: Instant,
) -> TaskOutcome {
    let deadline = first_seen + HEADER_TIMEOUT;
    let mut data = Vec::new();
    loop {
        connection.receive(&mut data);
        if !data.is_empty() {
            match probe_request(&data) {
                ProbeStatus::Full => break,
                ProbeStatus::Bad => {
                    return respond_error_and_close(&connection, StatusCode::BadRequest, &data)
                }
                ProbeStatus::Partial => {}
            }
        }
        if Instant::now() >= deadline {
            return respond_error_and_close(&connection, StatusCode::BadRequest, &data);
        }
        thread::sleep(TASK_POLL_DELAY);
    }

    let (status, request) = parse_request(&data);
    if status != StatusCode::Ok {
        let outcome = respond_error_and_close(&connection, status, &data);
        return TaskOutcome {
            request: request.short_string(),
            ..outcome
        };
    }

    for binding in &handlers {
        if !binding.matches(request.method) {
            continue;
        }
        let response = binding.execute(&request);
        if !response.handled {
            continue;
        }
        connection.send(&response.serialize());
        return TaskOutcome {
            status: response.status,
            request: request.short_string(),
        };
    }

    let response = HttpResponse::error(StatusCode::MethodNotAllowed);
    connection.send(&response.serialize());
    TaskOutcome {
        status: StatusCode::MethodNotAllowed,
        request: request.short_string(),
    }
}

/// Sends the stock error page, lets it flush, and closes the connection.
fn respond_error_and_close(
    connection: &ConnectionHandle,
    status: StatusCode,
    raw: &[u8],
) -> TaskOutcome {
    let response = HttpResponse::error(status);
    connection.send(&response.serialize());
    let flush_deadline = Instant::now() + ERROR_FLUSH_BUDGET;
    while connection.outgoing_size() > 0 && Instant::now() < flush_deadline {
        thread::sleep(TASK_POLL_DELAY);
    }
    connection.close();

    let preview = String::from_utf8_lossy(&raw[..raw.len().min(40)]).into_owned();
    TaskOutcome {
        status,
        request: preview,
    }
}

/// The `ANY`-bound filesystem handler.
fn respond_from_filesystem(
    filesystem: &Arc<Mutex<HttpFilesystem>>,
    serve_mode: ServeMode,
    request: &HttpRequest,
) -> HttpResponse {
    if request.method != Method::Get {
        return HttpResponse::error(StatusCode::MethodNotAllowed);
    }

    let filesystem = filesystem.lock().unwrap();
    if serve_mode == ServeMode::Dynamic && url_is_page(&request.url) {
        match request.header_value(SPA_MARKER_HEADER) {
            Some(value) if value == SPA_MARKER_VALUE => serve_fragment(&filesystem, &request.url),
            _ => {
                let mut response = HttpResponse::with_payload(
                    StatusCode::Ok,
                    make_bootstrap_page(&request.url),
                );
                response.add_header_field("Content-Type", "text/html; charset=utf-8");
                response
            }
        }
    } else {
        serve_static(&filesystem, &request.url)
    }
}

/// A URL addresses a page (rather than an asset) when its last segment has
/// no extension or an explicit `.html` one.
fn url_is_page(url: &str) -> bool {
    let last = url.rsplit('/').next().unwrap_or(url);
    !last.contains('.') || last.ends_with(".html")
}

fn serve_static(filesystem: &HttpFilesystem, url: &str) -> HttpResponse {
    let id = filesystem.find_file(url);
    if id == 0 {
        return HttpResponse::error(StatusCode::NotFound);
    }
    let Some(content) = filesystem.read_file(id) else {
        return HttpResponse::error(StatusCode::InternalServerError);
    };
    if content.is_empty() {
        return HttpResponse::new(StatusCode::NoContent);
    }
    let content_type = content_type_for(filesystem.extension(id).unwrap_or(""));
    let mut response = HttpResponse::with_payload(StatusCode::Ok, content);
    response.add_header_field("Content-Type", &content_type);
    response
}

fn serve_fragment(filesystem: &HttpFilesystem, url: &str) -> HttpResponse {
    let id = filesystem.find_file(url);
    if id == 0 {
        return HttpResponse::error(StatusCode::NotFound);
    }
    let Some(content) = filesystem.read_file(id) else {
        return HttpResponse::error(StatusCode::InternalServerError);
    };
    let html = String::from_utf8_lossy(&content);
    let fragment = make_dynamic_fragment(&html, url).unwrap_or_else(|| html.clone().into_owned());
    let mut response = HttpResponse::with_payload(StatusCode::Ok, fragment);
    response.add_header_field("Content-Type", "text/html; charset=utf-8");
    response
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::{Duration, Instant};

    use tempfile::TempDir;

    use super::{HttpMode, HttpServer, ServeMode};
    use crate::http::{HttpResponse, Method, StatusCode};

    fn started(mut server: HttpServer) -> HttpServer {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        server.start("127.0.0.1", Some(0)).unwrap();
        server
    }

    /// Whether `response` holds a complete head plus `Content-Length`
    /// worth of body.
    fn response_complete(response: &[u8]) -> bool {
        let Some(head_end) = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|i| i + 4)
        else {
            return false;
        };
        let head = String::from_utf8_lossy(&response[..head_end]);
        let Some(length) = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .and_then(|v| v.trim().parse::<usize>().ok())
        else {
            return false;
        };
        response.len() >= head_end + length
    }

    /// Writes `request`, ticks the server until the response is complete
    /// or the connection closes, and returns everything read.
    fn exchange(server: &mut HttpServer, stream: &mut TcpStream, request: &[u8]) -> Vec<u8> {
        stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        stream.write_all(request).unwrap();

        let deadline = Instant::now() + Duration::from_secs(6);
        let mut response = Vec::new();
        while Instant::now() < deadline {
            server.handle_requests();
            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => response.extend_from_slice(&chunk[..n]),
                Err(_) => {}
            }
            if response_complete(&response) {
                break;
            }
        }
        response
    }

    fn connect(server: &HttpServer) -> TcpStream {
        let port = server.local_addr().unwrap().port();
        TcpStream::connect(("127.0.0.1", port)).unwrap()
    }

    #[test]
    fn hello_handler_answers_the_exact_response() {
        let mut server = HttpServer::new(HttpMode::Http, ServeMode::Static);
        server.bind_request_handler(Method::Get, |request| {
            if request.url != "/hello" {
                return HttpResponse::unhandled();
            }
            let mut response =
                HttpResponse::with_payload(StatusCode::Ok, "Hello from the server!");
            response.add_header_field("Content-Type", "text/plain; charset=utf-8");
            response
        });
        let mut server = started(server);

        let mut stream = connect(&server);
        let response = exchange(&mut server, &mut stream, b"GET /hello HTTP/1.1\r\n\r\n");
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 22\r\n"));
        assert!(text.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(text.ends_with("\r\n\r\nHello from the server!"));
    }

    #[test]
    fn missing_file_is_answered_with_404() {
        let webroot = TempDir::new().unwrap();
        fs::write(webroot.path().join("index.html"), "<html></html>").unwrap();

        let mut server = HttpServer::new(HttpMode::Http, ServeMode::Static);
        server.bind_filesystem_handler(webroot.path()).unwrap();
        let mut server = started(server);

        let mut stream = connect(&server);
        let response = exchange(&mut server, &mut stream, b"GET /missing.txt HTTP/1.1\r\n\r\n");
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.ends_with("404 Not Found"));
    }

    #[test]
    fn empty_file_is_answered_with_204() {
        let webroot = TempDir::new().unwrap();
        fs::write(webroot.path().join("empty.txt"), "").unwrap();

        let mut server = HttpServer::new(HttpMode::Http, ServeMode::Static);
        server.bind_filesystem_handler(webroot.path()).unwrap();
        let mut server = started(server);

        let mut stream = connect(&server);
        let response = exchange(&mut server, &mut stream, b"GET /empty.txt HTTP/1.1\r\n\r\n");
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
    }

    #[test]
    fn dynamic_mode_bootstraps_then_serves_the_fragment() {
        let webroot = TempDir::new().unwrap();
        fs::write(
            webroot.path().join("index.html"),
            "<html><head></head><body class=\"front\"><h1>Front</h1></body></html>",
        )
        .unwrap();

        let mut server = HttpServer::new(HttpMode::Http, ServeMode::Dynamic);
        server.bind_filesystem_handler(webroot.path()).unwrap();
        let mut server = started(server);

        let mut stream = connect(&server);
        let bootstrap = exchange(&mut server, &mut stream, b"GET / HTTP/1.1\r\n\r\n");
        let bootstrap = String::from_utf8(bootstrap).unwrap();
        assert!(bootstrap.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(bootstrap.contains("<main></main>"));
        assert!(bootstrap.contains("<script name=\"es-bootstrap-dynamic\">"));

        let mut stream = connect(&server);
        let fragment = exchange(
            &mut server,
            &mut stream,
            b"GET / HTTP/1.1\r\nX-Requested-With: SPA\r\n\r\n",
        );
        let fragment = String::from_utf8(fragment).unwrap();
        assert!(fragment.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(fragment.contains("<main class=\"front\"><h1>Front</h1></main>"));
    }

    #[test]
    fn stalled_request_head_is_answered_with_400_and_closed() {
        let mut server = HttpServer::new(HttpMode::Http, ServeMode::Static);
        server.bind_request_handler(Method::Any, |_| HttpResponse::new(StatusCode::Ok));
        let mut server = started(server);

        let mut stream = connect(&server);
        // Two bytes, then silence: the header budget expires server-side.
        let response = exchange(&mut server, &mut stream, b"GE");
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        // The connection is closed after the error response.
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut closed = false;
        while Instant::now() < deadline {
            server.handle_requests();
            let mut chunk = [0u8; 64];
            match stream.read(&mut chunk) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                _ => std::thread::sleep(Duration::from_millis(10)),
            }
        }
        assert!(closed);

        // Other connections are unaffected.
        let mut stream = connect(&server);
        let response = exchange(&mut server, &mut stream, b"GET /ok HTTP/1.1\r\n\r\n");
        assert!(String::from_utf8(response)
            .unwrap()
            .starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn overlong_url_is_answered_with_414() {
        let mut server = HttpServer::new(HttpMode::Http, ServeMode::Static);
        server.bind_request_handler(Method::Any, |_| HttpResponse::new(StatusCode::Ok));
        let mut server = started(server);

        // URL of 9001 bytes: one past the limit.
        let mut request = b"GET /".to_vec();
        request.extend(std::iter::repeat(b'a').take(9000));
        request.extend(b" HTTP/1.1\r\n\r\n");

        let mut stream = connect(&server);
        let response = exchange(&mut server, &mut stream, &request);
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 414 URI Too Long\r\n"));
        assert!(text.ends_with("414 URI Too Long"));
    }

    #[test]
    fn handler_walk_is_in_registration_order_and_skips_declines() {
        let mut server = HttpServer::new(HttpMode::Http, ServeMode::Static);
        server.bind_request_handler(Method::Get, |request| {
            if request.url == "/first" {
                HttpResponse::with_payload(StatusCode::Ok, "first")
            } else {
                HttpResponse::unhandled()
            }
        });
        server.bind_request_handler(Method::Any, |_| {
            HttpResponse::with_payload(StatusCode::Ok, "fallback")
        });
        let mut server = started(server);

        let mut stream = connect(&server);
        let response = exchange(&mut server, &mut stream, b"GET /first HTTP/1.1\r\n\r\n");
        assert!(String::from_utf8(response).unwrap().ends_with("first"));

        let mut stream = connect(&server);
        let response = exchange(&mut server, &mut stream, b"GET /other HTTP/1.1\r\n\r\n");
        assert!(String::from_utf8(response).unwrap().ends_with("fallback"));
    }

    #[test]
    fn unmatched_method_is_answered_with_405() {
        let mut server = HttpServer::new(HttpMode::Http, ServeMode::Static);
        server.bind_request_handler(Method::Post, |_| HttpResponse::new(StatusCode::Ok));
        let mut server = started(server);

        let mut stream = connect(&server);
        let response = exchange(&mut server, &mut stream, b"GET / HTTP/1.1\r\n\r\n");
        assert!(String::from_utf8(response)
            .unwrap()
            .starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    }

    #[test]
    fn https_start_without_tls_configuration_is_rejected() {
        let mut server = HttpServer::new(HttpMode::Https, ServeMode::Static);
        assert!(server.start("127.0.0.1", Some(0)).is_err());
    }
}

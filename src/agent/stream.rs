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

//! Per-connection stream worker.
//!
//! One worker thread owns one connection for its whole lifecycle: connect
//! (client) or adopt an accepted socket (server), then pump the send and
//! receive buffers against the socket (through the TLS engine when
//! encryption is on) until a terminate condition fires. Termination is
//! cooperative: [`StreamShared::stop`] is checked at every loop head, and
//! the longest the worker can be away from that check is one receive
//! timeout plus one iteration.
//!
//! Locking: the worker acquires buffer views only while holding the socket
//! lock; the embedder side ([`StreamShared::queue_send`] and friends) only
//! ever takes buffer locks. No lock cycle is possible.

use std::io::Read;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rustls::ServerConfig;
use tracing::{debug, error, trace};

use crate::buffer::NetBuffer;
use crate::net::{self, MutexSocket};
use crate::settings::NetAgentSettings;
use crate::tls::TlsSession;

/// Hard cap on kernel-pending receive bytes; a peer stacking up more than
/// this is treated as hostile and the connection is terminated.
pub(crate) const RECV_PENDING_MAX: usize = 50_000_000;

/// Pause between failed client connect attempts within the budget.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Sleep for an iteration that moved no bytes and is not yet slowed down.
const IDLE_YIELD: Duration = Duration::from_millis(5);

/// Per-iteration cap on encrypted bytes fed into the TLS engine.
const TLS_PUSH_MAX_INCOMING: usize = 16 * 1024;

/// Per-iteration cap on plaintext moved from the send buffer into the TLS
/// engine.
const TLS_PUSH_MAX_OUTGOING: usize = 16 * 1024;

/// Initial ring-buffer capacity for server-side connections.
const SERVER_BUFFER_SIZE: usize = 2048;

/// Initial ring-buffer capacity for client-side connections.
const CLIENT_BUFFER_SIZE: usize = 256;

/// State shared between the worker thread and the embedder-facing handles.
#[derive(Debug)]
pub(crate) struct StreamShared {
    socket: MutexSocket,
    send_buf: NetBuffer,
    recv_buf: NetBuffer,
    connected: AtomicBool,
    failed: AtomicBool,
    terminate: AtomicBool,
    settings: Mutex<Arc<NetAgentSettings>>,
}

impl StreamShared {
    fn new(settings: Arc<NetAgentSettings>, buffer_size: usize) -> Self {
        Self {
            socket: MutexSocket::new(),
            send_buf: NetBuffer::new(buffer_size),
            recv_buf: NetBuffer::new(buffer_size),
            connected: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            settings: Mutex::new(settings),
        }
    }

    /// Copies `data` into the send buffer. Returns `false` for empty input,
    /// a terminating worker, or allocation failure; the bytes are then
    /// guaranteed not to have been queued.
    pub fn queue_send(&self, data: &[u8]) -> bool {
        if data.is_empty() || self.terminate.load(Ordering::Relaxed) {
            return false;
        }
        self.send_buf.push(data).is_ok()
    }

    /// Appends everything received so far to `out` and marks it consumed.
    pub fn receive_into(&self, out: &mut Vec<u8>) {
        self.recv_buf.drain_into(out);
    }

    /// Best-effort size of received data; re-check under a view before
    /// relying on it.
    pub fn incoming_size(&self) -> usize {
        self.recv_buf.readable()
    }

    /// Best-effort size of queued-but-unsent data.
    pub fn outgoing_size(&self) -> usize {
        self.send_buf.readable()
    }

    /// Whether the connection is currently a live TCP endpoint.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Whether the connection failed to establish. Sticky once set.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    /// Requests cooperative termination at the next loop head.
    pub fn stop(&self) {
        self.terminate.store(true, Ordering::Relaxed);
    }

    /// Replaces the settings snapshot the worker reads each iteration.
    pub fn update_settings(&self, settings: Arc<NetAgentSettings>) {
        *self.settings.lock().unwrap() = settings;
    }

    fn settings(&self) -> Arc<NetAgentSettings> {
        self.settings.lock().unwrap().clone()
    }
}

/// How the worker obtains its socket.
#[derive(Debug)]
enum StreamMode {
    /// Resolve and connect within the client connect budget.
    Client { host: String, port: u16 },
    /// Socket was accepted by the listener; optionally wrap it in TLS.
    Server { tls: Option<Arc<ServerConfig>> },
}

/// Owner of one connection's worker thread. Dropping stops the worker and
/// joins it, never detaches.
#[derive(Debug)]
pub(crate) struct StreamWorker {
    shared: Arc<StreamShared>,
    thread: Option<JoinHandle<()>>,
}

impl StreamWorker {
    /// Client mode: the worker itself establishes the connection.
    pub fn start_client(host: &str, port: u16, settings: Arc<NetAgentSettings>) -> StreamWorker {
        let shared = Arc::new(StreamShared::new(settings, CLIENT_BUFFER_SIZE));
        let mode = StreamMode::Client {
            host: host.to_owned(),
            port,
        };
        Self::spawn(shared, mode)
    }

    /// Server mode: adopts an already-connected socket. The connected flag
    /// is raised before the thread starts so a sweep cannot reap the
    /// connection in the spawn window.
    pub fn start_server(
        socket: TcpStream,
        tls: Option<Arc<ServerConfig>>,
        settings: Arc<NetAgentSettings>,
    ) -> StreamWorker {
        let shared = Arc::new(StreamShared::new(settings, SERVER_BUFFER_SIZE));
        shared.socket.set(socket);
        shared.connected.store(true, Ordering::Relaxed);
        Self::spawn(shared, StreamMode::Server { tls })
    }

    fn spawn(shared: Arc<StreamShared>, mode: StreamMode) -> StreamWorker {
        let worker_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("stream-worker".into())
            .spawn(move || run(worker_shared, mode))
            .expect("failed to spawn stream worker thread");
        StreamWorker {
            shared,
            thread: Some(thread),
        }
    }

    /// Shared state handle for embedder-facing wrappers.
    pub fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }

    /// Requests cooperative termination.
    pub fn stop(&self) {
        self.shared.stop();
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Worker thread entry point.
fn run(shared: Arc<StreamShared>, mode: StreamMode) {
    let mut tls_config = None;
    match mode {
        StreamMode::Client { host, port } => {
            if !connect_with_budget(&shared, &host, port) {
                shared.failed.store(true, Ordering::Relaxed);
                debug!(host = %host, port, "client connect budget expired");
                return;
            }
        }
        StreamMode::Server { tls } => tls_config = tls,
    }

    {
        let guard = shared.socket.lock();
        match &*guard {
            Some(stream) => {
                let wait = shared.settings().socket_max_receive_wait();
                if net::set_receive_timeout(stream, wait).is_err() {
                    drop(guard);
                    finish(&shared, "failed to apply receive timeout");
                    return;
                }
            }
            None => {
                drop(guard);
                finish(&shared, "no socket to pump");
                return;
            }
        }
    }

    let mut tls = match tls_config {
        Some(config) => match TlsSession::new(config) {
            Ok(session) => Some(session),
            Err(e) => {
                error!(error = %e, "failed to start TLS session");
                shared.failed.store(true, Ordering::Relaxed);
                finish(&shared, "tls session setup failed");
                return;
            }
        },
        None => None,
    };

    let mut last_com = Instant::now();
    loop {
        if shared.terminate.load(Ordering::Relaxed) {
            finish(&shared, "stop requested");
            return;
        }

        let settings = shared.settings();
        let mut did_io = false;
        let fault = match tls.as_mut() {
            None => pump_plain(&shared, &mut last_com, &mut did_io),
            Some(session) => pump_tls(&shared, session, &mut last_com, &mut did_io),
        };
        if let Some(reason) = fault {
            finish(&shared, reason);
            return;
        }

        let delta = last_com.elapsed();
        if delta > settings.communication_gap_max() {
            finish(&shared, "comms delta timeout");
            return;
        } else if delta > settings.communication_gap_slowdown_delay() {
            thread::sleep(settings.communication_gap_slowdown_amount());
        } else if !did_io {
            thread::sleep(IDLE_YIELD);
        }
    }
}

/// Closes the socket and lowers the connected flag; the thread exits right
/// after and is joined by the owner.
fn finish(shared: &StreamShared, reason: &str) {
    debug!(reason, "connection worker terminating");
    shared.socket.close();
    shared.connected.store(false, Ordering::Relaxed);
}

/// Client-mode connect loop: retry until success or the budget expires.
fn connect_with_budget(shared: &StreamShared, host: &str, port: u16) -> bool {
    let deadline = Instant::now() + shared.settings().client_connect_timeout();
    loop {
        if shared.terminate.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match net::setup_stream(host, port, Some(remaining)) {
            Ok(stream) => {
                shared.socket.set(stream);
                shared.connected.store(true, Ordering::Relaxed);
                return true;
            }
            Err(e) => {
                trace!(host = %host, port, error = %e, "connect attempt failed");
                thread::sleep(CONNECT_RETRY_DELAY.min(remaining));
            }
        }
    }
}

/// One unencrypted pump iteration: send phase, then receive phase.
/// Returns the terminate reason on a fault.
fn pump_plain(
    shared: &StreamShared,
    last_com: &mut Instant,
    did_io: &mut bool,
) -> Option<&'static str> {
    // Send: one send() per iteration; the unsent suffix stays buffered.
    if shared.send_buf.readable() > 0 {
        let guard = shared.socket.lock();
        if let Some(stream) = &*guard {
            let view = shared.send_buf.read_view();
            let data = view.slice();
            if !data.is_empty() {
                let sent = net::send(stream, data);
                if sent == 0 {
                    return Some("send failure");
                }
                if view.commit(sent).is_err() {
                    return Some("send buffer fault");
                }
                *last_com = Instant::now();
                *did_io = true;
            }
        }
    }

    // Receive: reserve exactly what the kernel reports and read it.
    let guard = shared.socket.lock();
    if let Some(stream) = &*guard {
        let available = net::peek_available(stream);
        if available > RECV_PENDING_MAX {
            return Some("received data too large");
        }
        if available > 0 {
            let Ok(mut view) = shared.recv_buf.write_view(available) else {
                return Some("receive buffer allocation failed");
            };
            match net::recv(stream, view.slice()) {
                Ok(0) => return Some("peer closed connection"),
                Ok(n) => {
                    if view.commit(n).is_err() {
                        return Some("receive buffer fault");
                    }
                    *last_com = Instant::now();
                    *did_io = true;
                }
                Err(ref e) if net::is_timeout(e) => {}
                Err(_) => return Some("receive failure"),
            }
        }
    }
    None
}

/// One encrypted pump iteration. The socket only ever sees TLS records;
/// plaintext moves between the app buffers and the engine afterwards.
fn pump_tls(
    shared: &StreamShared,
    session: &mut TlsSession,
    last_com: &mut Instant,
    did_io: &mut bool,
) -> Option<&'static str> {
    // Encrypted records out: engine -> socket.
    if session.wants_write() {
        let guard = shared.socket.lock();
        if let Some(stream) = &*guard {
            let mut writer: &TcpStream = stream;
            match session.write_records(&mut writer) {
                Ok(n) if n > 0 => {
                    *last_com = Instant::now();
                    *did_io = true;
                }
                Ok(_) => {}
                Err(ref e) if net::is_timeout(e) => {}
                Err(_) => return Some("tls record send failure"),
            }
        }
    }

    // Encrypted records in: socket -> engine, bounded per iteration.
    {
        let guard = shared.socket.lock();
        if let Some(stream) = &*guard {
            let available = net::peek_available(stream);
            if available > RECV_PENDING_MAX {
                return Some("received data too large");
            }
            if available > 0 {
                let limit = available.min(TLS_PUSH_MAX_INCOMING) as u64;
                let mut reader = <&TcpStream as Read>::take(stream, limit);
                match session.read_records(&mut reader) {
                    Ok(0) => return Some("peer closed connection"),
                    Ok(_) => {
                        *last_com = Instant::now();
                        *did_io = true;
                    }
                    Err(ref e) if net::is_timeout(e) => {}
                    Err(_) => return Some("tls record receive failure"),
                }
            }
        }
    }

    // Plaintext bridge out: app send buffer -> engine.
    if shared.send_buf.readable() > 0 {
        let view = shared.send_buf.read_view();
        let data = view.slice();
        let chunk = &data[..data.len().min(TLS_PUSH_MAX_OUTGOING)];
        match session.push_plaintext(chunk) {
            Ok(accepted) => {
                if view.commit(accepted).is_err() {
                    return Some("send buffer fault");
                }
            }
            Err(_) => return Some("tls engine rejected outgoing data"),
        }
    }

    // Plaintext bridge in: engine -> app receive buffer.
    loop {
        let mut chunk = [0u8; 4096];
        match session.pull_plaintext(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if shared.recv_buf.push(&chunk[..n]).is_err() {
                    return Some("receive buffer allocation failed");
                }
                *last_com = Instant::now();
                *did_io = true;
            }
            Err(ref e) if net::is_timeout(e) => break,
            Err(_) => return Some("tls plaintext fault"),
        }
    }

    if session.is_closed() {
        return Some("tls session closed by peer");
    }
    None
}

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

//! The agent: owner of a set of connections and, in server mode, the
//! listener that feeds it.
//!
//! All agent state is mutated from the embedder's thread only. Each
//! connection runs its own worker; the agent's
//! [`update_connections`](Agent::update_connections) tick adopts freshly
//! accepted sockets (dropping them once the connection cap is reached) and
//! reaps connections whose worker has ended or failed, joining their
//! threads.

mod listener;
mod stream;

use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

use rustls::ServerConfig;
use tracing::{error, warn};

use crate::net;
use crate::settings::NetAgentSettings;
use crate::tls::{build_server_config, TlsError, TlsSettings};

use listener::ListenWorker;
use stream::StreamWorker;

/// Identity of a connection within its agent. Ids are assigned
/// monotonically and never reused, so they stay valid across sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operating mode of an [`Agent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// Outbound connections only.
    Client,
    /// Accepts plaintext connections.
    Server,
    /// Accepts TLS connections; requires [`Agent::configure_tls`].
    ServerEncrypted,
}

/// One live TCP endpoint: a worker thread plus its buffers. Owned by the
/// agent; dropped (and its thread joined) when the agent sweeps it out.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    worker: StreamWorker,
}

impl Connection {
    /// Agent-assigned identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the connection is currently a live TCP endpoint.
    pub fn is_connected(&self) -> bool {
        self.worker.shared().is_connected()
    }

    /// Whether the connection failed to establish (client mode).
    pub fn is_failed(&self) -> bool {
        self.worker.shared().is_failed()
    }

    /// Queues `data` for sending in FIFO order. Returns `false` for empty
    /// input, a terminating connection, or allocation failure.
    pub fn send(&self, data: &[u8]) -> bool {
        self.worker.shared().queue_send(data)
    }

    /// Appends everything received so far to `out` and marks it consumed.
    pub fn receive(&self, out: &mut Vec<u8>) {
        self.worker.shared().receive_into(out);
    }

    /// Best-effort size of pending received data.
    pub fn incoming_size(&self) -> usize {
        self.worker.shared().incoming_size()
    }

    /// Asks the worker to terminate; it exits within one receive timeout
    /// plus one iteration and is joined on the next sweep (or drop).
    pub fn close(&self) {
        self.worker.stop();
    }

    /// A cheap cloneable handle for use from other threads (request
    /// tasks). The handle keeps the shared buffers alive but not the
    /// worker itself.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            shared: self.worker.shared().clone(),
        }
    }
}

/// Thread-safe view of one connection's buffers and flags.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    shared: Arc<stream::StreamShared>,
}

impl ConnectionHandle {
    /// Identity of the underlying connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// See [`Connection::is_connected`].
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// See [`Connection::send`].
    pub fn send(&self, data: &[u8]) -> bool {
        self.shared.queue_send(data)
    }

    /// See [`Connection::receive`].
    pub fn receive(&self, out: &mut Vec<u8>) {
        self.shared.receive_into(out);
    }

    /// See [`Connection::incoming_size`].
    pub fn incoming_size(&self) -> usize {
        self.shared.incoming_size()
    }

    /// Best-effort size of queued-but-unsent data; lets a task wait for a
    /// response to flush before closing the connection.
    pub fn outgoing_size(&self) -> usize {
        self.shared.outgoing_size()
    }

    /// See [`Connection::close`].
    pub fn close(&self) {
        self.shared.stop();
    }
}

/// Owner of a set of [`Connection`]s keyed by [`ConnectionId`] and, in
/// server mode, of the listener feeding them.
///
/// # Examples
///
/// ```no_run
/// use netagent::{Agent, AgentMode};
///
/// let mut agent = Agent::new(AgentMode::Client);
/// let id = agent.connect("localhost", 5001);
/// loop {
///     let connection = agent.connection(id).unwrap();
///     if connection.is_failed() {
///         break;
///     }
///     if connection.is_connected() {
///         connection.send(b"hello");
///         break;
///     }
///     std::thread::sleep(std::time::Duration::from_millis(10));
/// }
/// ```
#[derive(Debug)]
pub struct Agent {
    mode: AgentMode,
    connections: Vec<Connection>,
    id_counter: u64,
    listener: Option<ListenWorker>,
    settings: Arc<NetAgentSettings>,
    tls_config: Option<Arc<ServerConfig>>,
}

impl Agent {
    /// Creates an agent with default settings.
    pub fn new(mode: AgentMode) -> Agent {
        Self::with_settings(mode, NetAgentSettings::default())
    }

    /// Creates an agent with the given settings snapshot.
    pub fn with_settings(mode: AgentMode, settings: NetAgentSettings) -> Agent {
        Agent {
            mode,
            connections: Vec::new(),
            id_counter: 0,
            listener: None,
            settings: Arc::new(settings),
            tls_config: None,
        }
    }

    /// Operating mode chosen at construction.
    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    /// Whether this agent accepts inbound connections.
    pub fn is_server(&self) -> bool {
        matches!(self.mode, AgentMode::Server | AgentMode::ServerEncrypted)
    }

    /// Builds and stores the TLS server configuration used for connections
    /// accepted in [`AgentMode::ServerEncrypted`].
    pub fn configure_tls(&mut self, settings: TlsSettings) -> Result<(), TlsError> {
        self.tls_config = Some(build_server_config(&settings)?);
        Ok(())
    }

    fn next_id(&mut self) -> ConnectionId {
        self.id_counter += 1;
        ConnectionId(self.id_counter)
    }

    /// Establishes a TCP connection to a remote host. Client mode only.
    /// The returned id stays valid for the life of the connection.
    pub fn connect(&mut self, host: &str, port: u16) -> ConnectionId {
        assert!(
            self.mode == AgentMode::Client,
            "connect is a client-mode operation"
        );
        let id = self.next_id();
        let worker = StreamWorker::start_client(host, port, self.settings.clone());
        self.connections.push(Connection { id, worker });
        id
    }

    /// Begins accepting connections. Server mode only; bind or listen
    /// failures surface here.
    pub fn listen(&mut self, port: u16, host: &str) -> io::Result<()> {
        assert!(self.is_server(), "listen is a server-mode operation");
        self.listener = Some(ListenWorker::start(port, host, self.settings.clone())?);
        Ok(())
    }

    /// Address the listener is bound to, once [`Agent::listen`] succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|l| l.local_addr())
    }

    /// Stops accepting connections. Existing connections are unaffected.
    pub fn stop_listening(&mut self) {
        self.listener = None;
    }

    /// Server tick: adopts freshly accepted sockets and sweeps out
    /// connections whose worker ended or failed. Returns `false` when
    /// called without a running listener.
    pub fn update_connections(&mut self) -> bool {
        let Some(listener) = &self.listener else {
            return false;
        };

        for socket in listener.drain_accepted() {
            if self.connections.len() >= self.settings.connections_max {
                let _ = net::shutdown(&socket, Shutdown::Both);
                warn!("connection limit exceeded, dropped connection");
                continue;
            }
            let tls = match self.mode {
                AgentMode::ServerEncrypted => match &self.tls_config {
                    Some(config) => Some(config.clone()),
                    None => {
                        error!("encrypted mode without TLS configuration, dropping connection");
                        let _ = net::shutdown(&socket, Shutdown::Both);
                        continue;
                    }
                },
                _ => None,
            };
            let id = self.next_id();
            let worker = StreamWorker::start_server(socket, tls, self.settings.clone());
            self.connections.push(Connection { id, worker });
        }

        self.connections
            .retain(|c| c.is_connected() && !c.is_failed());
        true
    }

    /// Looks a connection up by id. Ids are stable across sweeps; `None`
    /// means the connection has been reaped.
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// All currently owned connections, in creation order.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Number of currently owned connections.
    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    /// Replaces the settings snapshot and pushes it to every running
    /// worker. The listener keeps the snapshot it was started with.
    pub fn apply_settings(&mut self, settings: NetAgentSettings) {
        let snapshot = Arc::new(settings);
        for connection in &self.connections {
            connection
                .worker
                .shared()
                .update_settings(snapshot.clone());
        }
        self.settings = snapshot;
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::{Agent, AgentMode};
    use crate::settings::NetAgentSettings;

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn connected_pair() -> (Agent, Agent, super::ConnectionId) {
        let mut server = Agent::new(AgentMode::Server);
        server.listen(0, "127.0.0.1").unwrap();
        let port = server.local_addr().unwrap().port();

        let mut client = Agent::new(AgentMode::Client);
        let id = client.connect("127.0.0.1", port);

        assert!(wait_until(Duration::from_secs(3), || client
            .connection(id)
            .is_some_and(|c| c.is_connected())));
        assert!(wait_until(Duration::from_secs(3), || {
            server.update_connections();
            server.num_connections() == 1
        }));
        (server, client, id)
    }

    #[test]
    fn echo_round_trip_in_both_directions() {
        let (mut server, client, id) = connected_pair();

        assert!(client.connection(id).unwrap().send(b"HELLO"));
        assert!(wait_until(Duration::from_secs(3), || {
            server.update_connections();
            server
                .connections()
                .first()
                .is_some_and(|c| c.incoming_size() > 0)
        }));
        let mut received = Vec::new();
        server.connections()[0].receive(&mut received);
        assert_eq!(b"HELLO", received.as_slice());

        assert!(server.connections()[0].send(b"WORLD"));
        assert!(wait_until(Duration::from_secs(3), || client
            .connection(id)
            .unwrap()
            .incoming_size()
            > 0));
        let mut received = Vec::new();
        client.connection(id).unwrap().receive(&mut received);
        assert_eq!(b"WORLD", received.as_slice());
    }

    #[test]
    fn idle_connections_close_after_the_communication_gap() {
        let settings = NetAgentSettings {
            communication_gap_max_sec: 0.5,
            communication_gap_slowdown_delay_sec: 0.2,
            communication_gap_slowdown_amount_ms: 10.0,
            ..NetAgentSettings::default()
        };
        let mut server = Agent::with_settings(AgentMode::Server, settings.clone());
        server.listen(0, "127.0.0.1").unwrap();
        let port = server.local_addr().unwrap().port();

        let mut client = Agent::with_settings(AgentMode::Client, settings);
        let id = client.connect("127.0.0.1", port);
        assert!(wait_until(Duration::from_secs(3), || client
            .connection(id)
            .is_some_and(|c| c.is_connected())));
        assert!(wait_until(Duration::from_secs(3), || {
            server.update_connections();
            server.num_connections() == 1
        }));

        // Exchange one message, then let both sides idle past the gap.
        client.connection(id).unwrap().send(b"ping");
        assert!(wait_until(Duration::from_secs(2), || {
            client.connection(id).is_some_and(|c| !c.is_connected())
        }));
        assert!(wait_until(Duration::from_secs(2), || {
            server.update_connections();
            server.num_connections() == 0
        }));
    }

    #[test]
    fn stop_request_exits_the_worker_promptly() {
        let (_server, client, id) = connected_pair();
        client.connection(id).unwrap().close();
        let asked = Instant::now();
        assert!(wait_until(Duration::from_secs(1), || !client
            .connection(id)
            .unwrap()
            .is_connected()));
        assert!(asked.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn empty_send_returns_false_without_queueing() {
        let (mut server, client, id) = connected_pair();
        assert!(!client.connection(id).unwrap().send(b""));

        // Nothing arrives on the server side.
        std::thread::sleep(Duration::from_millis(100));
        server.update_connections();
        assert_eq!(0, server.connections()[0].incoming_size());
    }

    #[test]
    fn connection_ids_are_distinct_and_monotonic() {
        let mut server = Agent::new(AgentMode::Server);
        server.listen(0, "127.0.0.1").unwrap();
        let port = server.local_addr().unwrap().port();

        let mut clients = Vec::new();
        for _ in 0..3 {
            let mut client = Agent::new(AgentMode::Client);
            client.connect("127.0.0.1", port);
            clients.push(client);
        }
        assert!(wait_until(Duration::from_secs(3), || {
            server.update_connections();
            server.num_connections() == 3
        }));

        let ids: Vec<_> = server.connections().iter().map(|c| c.id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(3, sorted.len());
        assert_eq!(ids, sorted, "ids are assigned in increasing order");
    }

    #[test]
    fn connections_over_the_limit_are_dropped() {
        let settings = NetAgentSettings {
            connections_max: 2,
            ..NetAgentSettings::default()
        };
        let mut server = Agent::with_settings(AgentMode::Server, settings);
        server.listen(0, "127.0.0.1").unwrap();
        let port = server.local_addr().unwrap().port();

        let mut clients = Vec::new();
        for _ in 0..4 {
            let mut client = Agent::new(AgentMode::Client);
            client.connect("127.0.0.1", port);
            clients.push(client);
        }
        assert!(wait_until(Duration::from_secs(3), || {
            server.update_connections();
            server.num_connections() == 2
        }));
        // Further ticks never admit past the cap.
        for _ in 0..10 {
            server.update_connections();
            assert!(server.num_connections() <= 2);
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn unreachable_host_marks_the_connection_failed() {
        let settings = NetAgentSettings {
            client_connect_timeout_sec: 0.3,
            ..NetAgentSettings::default()
        };
        let mut client = Agent::with_settings(AgentMode::Client, settings);
        // A listener we immediately drop leaves a port with nothing bound.
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let id = client.connect("127.0.0.1", port);
        assert!(wait_until(Duration::from_secs(2), || client
            .connection(id)
            .is_some_and(|c| c.is_failed())));
        assert!(!client.connection(id).unwrap().is_connected());
    }
}

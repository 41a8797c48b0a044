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

//! Accept-loop worker for server mode.
//!
//! Binds and listens on the caller's thread (so bind errors surface from
//! [`ListenWorker::start`]), then accepts on its own thread and hands each
//! socket over on a channel. The listener forgets a socket the moment it is
//! sent; the agent alone decides whether it becomes a connection. While too
//! many accepted sockets are waiting to be drained, the loop stops
//! accepting and sleeps in overload-delay increments.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::io;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error};

use crate::net;
use crate::settings::NetAgentSettings;

/// Poll cadence of the non-blocking accept loop; bounds both accept latency
/// and stop latency.
const ACCEPT_POLL_DELAY: Duration = Duration::from_millis(10);

/// Server-mode listener thread plus the hand-over queue of accepted
/// sockets.
#[derive(Debug)]
pub(crate) struct ListenWorker {
    accepted: Receiver<TcpStream>,
    terminate: Arc<AtomicBool>,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl ListenWorker {
    /// Binds `host:port` and starts the accept loop. The settings snapshot
    /// taken here governs the admission-control thresholds for the lifetime
    /// of the listener.
    pub fn start(
        port: u16,
        host: &str,
        settings: Arc<NetAgentSettings>,
    ) -> io::Result<ListenWorker> {
        let listener = net::create_listen_socket(port, host)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let terminate = Arc::new(AtomicBool::new(false));
        let stop_flag = terminate.clone();
        let thread = thread::Builder::new()
            .name("listen-worker".into())
            .spawn(move || accept_loop(listener, tx, stop_flag, settings))?;

        debug!(%local_addr, "listening for connections");
        Ok(ListenWorker {
            accepted: rx,
            terminate,
            local_addr,
            thread: Some(thread),
        })
    }

    /// Consumes every accepted socket currently queued, in accept order.
    pub fn drain_accepted(&self) -> Vec<TcpStream> {
        self.accepted.try_iter().collect()
    }

    /// Address the listen socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Asks the accept loop to exit; it notices within one poll delay.
    pub fn stop(&self) {
        self.terminate.store(true, Ordering::Relaxed);
    }
}

impl Drop for ListenWorker {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    accepted: Sender<TcpStream>,
    terminate: Arc<AtomicBool>,
    settings: Arc<NetAgentSettings>,
) {
    while !terminate.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "new connection established");
                if accepted.send(stream).is_err() {
                    // Receiving side is gone, the agent is shutting down.
                    break;
                }
            }
            Err(ref e) if net::is_timeout(e) => thread::sleep(ACCEPT_POLL_DELAY),
            Err(e) => {
                error!(error = %e, "listen socket failed, stopping accept loop");
                break;
            }
        }

        if accepted.len() >= settings.concurrent_connect_requests_max {
            debug!(
                pending = accepted.len(),
                "pending new connections over limit, slowing acceptance rate"
            );
            while accepted.len() >= settings.concurrent_connect_requests_max
                && !terminate.load(Ordering::Relaxed)
            {
                thread::sleep(settings.connect_request_overload_delay());
            }
        }
    }
    // Listen socket closes here; queued sockets stay valid for the agent.
}

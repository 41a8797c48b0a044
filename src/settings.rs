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

//! Tunable settings for an agent instance and the HTTP server on top.
//!
//! Settings are shared as immutable snapshots behind an `Arc`; applying new
//! settings replaces the snapshot rather than mutating it in place.

use std::time::Duration;

/// Settings for a network agent instance. All fields have conservative
/// defaults; construct with struct-update syntax to override a few:
///
/// ```
/// use netagent::NetAgentSettings;
///
/// let settings = NetAgentSettings {
///     connections_max: 500,
///     ..NetAgentSettings::default()
/// };
/// assert_eq!(10.0, settings.communication_gap_max_sec);
/// ```
#[derive(Debug, Clone)]
pub struct NetAgentSettings {
    /// Server: maximum number of connections live at the same time.
    pub connections_max: usize,

    /// Maximum time to keep a connection open with no communication
    /// happening, in seconds.
    pub communication_gap_max_sec: f64,

    /// Idle time after which a connection worker starts sleeping between
    /// iterations, in seconds.
    pub communication_gap_slowdown_delay_sec: f64,

    /// How long the worker sleeps per iteration once slowed down, in
    /// milliseconds.
    pub communication_gap_slowdown_amount_ms: f64,

    /// Server: stop accepting while more than this many accepted sockets
    /// are waiting to be handed over.
    pub concurrent_connect_requests_max: usize,

    /// Server: sleep quantum for the listener while the hand-over queue is
    /// over limit, in milliseconds.
    pub connect_request_overload_delay_ms: f64,

    /// Maximum time a receive may block waiting for data, in milliseconds.
    pub socket_max_receive_wait_ms: f64,

    /// Client: total budget for establishing a connection, in seconds.
    pub client_connect_timeout_sec: f64,
}

impl Default for NetAgentSettings {
    fn default() -> Self {
        Self {
            connections_max: 100,
            communication_gap_max_sec: 10.0,
            communication_gap_slowdown_delay_sec: 1.5,
            communication_gap_slowdown_amount_ms: 50.0,
            concurrent_connect_requests_max: 10,
            connect_request_overload_delay_ms: 80.0,
            socket_max_receive_wait_ms: 10.0,
            client_connect_timeout_sec: 3.0,
        }
    }
}

impl NetAgentSettings {
    /// Idle duration after which a worker terminates its connection.
    pub fn communication_gap_max(&self) -> Duration {
        Duration::from_secs_f64(self.communication_gap_max_sec)
    }

    /// Idle duration after which a worker starts slowing down.
    pub fn communication_gap_slowdown_delay(&self) -> Duration {
        Duration::from_secs_f64(self.communication_gap_slowdown_delay_sec)
    }

    /// Sleep quantum once slowed down.
    pub fn communication_gap_slowdown_amount(&self) -> Duration {
        Duration::from_secs_f64(self.communication_gap_slowdown_amount_ms / 1000.0)
    }

    /// Listener sleep quantum while throttled.
    pub fn connect_request_overload_delay(&self) -> Duration {
        Duration::from_secs_f64(self.connect_request_overload_delay_ms / 1000.0)
    }

    /// Per-receive blocking timeout.
    pub fn socket_max_receive_wait(&self) -> Duration {
        Duration::from_secs_f64(self.socket_max_receive_wait_ms / 1000.0)
    }

    /// Total client connect budget.
    pub fn client_connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.client_connect_timeout_sec)
    }
}

/// Settings specific to the HTTP server layer.
#[derive(Debug, Clone)]
pub struct HttpServerSettings {
    /// How often the webroot is rescanned for new or removed files, in
    /// seconds.
    pub filesystem_refresh_interval_sec: f64,
}

impl Default for HttpServerSettings {
    fn default() -> Self {
        Self {
            filesystem_refresh_interval_sec: 5.0,
        }
    }
}

impl HttpServerSettings {
    /// Webroot rescan interval.
    pub fn filesystem_refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(self.filesystem_refresh_interval_sec)
    }
}

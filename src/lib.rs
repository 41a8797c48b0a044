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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]
// Disallow warnings in doc examples.
#![doc(test(attr(deny(warnings))))]

//! netagent is a symmetric TCP client/server library built on blocking
//! sockets and one worker thread per connection, with optional server-side
//! TLS 1.2 and an HTTP/1.1 application layer on top.
//!
//! The [`Agent`] owns a set of [`Connection`]s, each driven by its own
//! worker that multiplexes sending, receiving, TLS record processing,
//! idle handling and termination. In server mode a listener thread accepts
//! sockets under overload protection and hands them to the agent, which the
//! embedder drives by calling [`Agent::update_connections`] each tick.
//!
//! [`HttpServer`] wraps an agent and adds an incremental request parser,
//! a handler registry and a static/dynamic filesystem responder.

pub mod agent;
pub mod buffer;
pub mod http;
pub mod net;
pub mod settings;
pub mod tls;

pub use agent::{Agent, AgentMode, Connection, ConnectionHandle, ConnectionId};
pub use buffer::{BufferError, NetBuffer};
pub use http::server::{HttpMode, HttpServer, ServeMode};
pub use http::{HttpRequest, HttpResponse, Method, StatusCode};
pub use settings::{HttpServerSettings, NetAgentSettings};
pub use tls::{CipherProfile, KeyKind, TlsError, TlsSettings};

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

//! Socket primitives consumed by the stream and listener workers.
//!
//! A thin, uniform surface over blocking TCP sockets: address resolution,
//! connect, listen-socket setup, bounded send/recv, a non-blocking query of
//! pending receive bytes, and the per-socket mutex wrapper that serializes
//! I/O against shutdown and close.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use std::{fmt, io};

use socket2::{Domain, Protocol, Socket, Type};

/// Accept backlog for listen sockets.
const LISTEN_BACKLOG: i32 = 100;

/// Resolves `host:port` to connectable or bindable addresses.
///
/// With `for_listen` set, an empty `host` means "bind on all interfaces",
/// preferring the dual-stack IPv6 wildcard. Without it, an empty `host`
/// resolves to localhost.
pub fn resolve(host: &str, port: u16, for_listen: bool) -> io::Result<Vec<SocketAddr>> {
    if host.is_empty() {
        return Ok(if for_listen {
            vec![
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ]
        } else {
            vec![
                SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
                SocketAddr::from((Ipv6Addr::LOCALHOST, port)),
            ]
        });
    }
    Ok((host, port).to_socket_addrs()?.collect())
}

/// Walks the address list and returns the first successfully connected
/// stream, closing each failed attempt. With a `timeout`, each attempt is
/// bounded individually.
pub fn connect(addrs: &[SocketAddr], timeout: Option<Duration>) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(t) => TcpStream::connect_timeout(addr, t),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses to connect to")))
}

/// Resolution plus connect in one step; the client-mode path of a stream
/// worker calls this in a retry loop until its connect budget expires.
pub fn setup_stream(host: &str, port: u16, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let addrs = resolve(host, port, false)?;
    connect(&addrs, timeout)
}

/// Creates a bound, listening socket. On dual-stack hosts an IPv6 wildcard
/// bind also accepts IPv4 clients (`IPV6_V6ONLY` is cleared).
pub fn create_listen_socket(port: u16, host: &str) -> io::Result<TcpListener> {
    let addrs = resolve(host, port, true)?;
    let mut last_err = None;
    for addr in &addrs {
        match bind_and_listen(addr) {
            Ok(listener) => return Ok(listener),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to bind")))
}

fn bind_and_listen(addr: &SocketAddr) -> io::Result<TcpListener> {
    let domain = Domain::for_address(*addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    if addr.is_ipv6() {
        // Not fatal where the stack cannot do dual-stack.
        let _ = socket.set_only_v6(false);
    }
    socket.set_reuse_address(true)?;
    socket.bind(&(*addr).into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Sends as much of `data` as the kernel accepts. Returns the number of
/// bytes taken, 0 on any socket error; the caller keeps the unsent suffix
/// buffered and retries later.
pub fn send(stream: &TcpStream, data: &[u8]) -> usize {
    let mut writer: &TcpStream = stream;
    match writer.write(data) {
        Ok(n) => n,
        Err(_) => 0,
    }
}

/// Receives into `dst`, blocking up to the socket's receive timeout.
/// `Ok(0)` means the peer performed an orderly close; a timeout surfaces as
/// `WouldBlock` or `TimedOut` depending on the platform.
pub fn recv(stream: &TcpStream, dst: &mut [u8]) -> io::Result<usize> {
    let mut reader: &TcpStream = stream;
    reader.read(dst)
}

/// True for error kinds that only mean "no data within the receive
/// timeout", not a connection fault.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Number of bytes already in the kernel receive buffer, without blocking.
/// 0 means "nothing now"; errors are reported as 0 as well.
#[cfg(unix)]
pub fn peek_available(stream: &TcpStream) -> usize {
    use std::os::unix::io::AsRawFd;

    let mut available: libc::c_int = 0;
    // SAFETY: FIONREAD reads an int-sized out parameter; the fd is owned by
    // `stream` for the duration of the call.
    let rc = unsafe { libc::ioctl(stream.as_raw_fd(), libc::FIONREAD, &mut available) };
    if rc < 0 {
        return 0;
    }
    available.max(0) as usize
}

/// Fallback for platforms without `FIONREAD`: a bounded `MSG_PEEK`, which
/// may block up to the socket's receive timeout and caps the report at the
/// scratch size.
#[cfg(not(unix))]
pub fn peek_available(stream: &TcpStream) -> usize {
    let mut scratch = [0u8; 64 * 1024];
    match stream.peek(&mut scratch) {
        Ok(n) => n,
        Err(_) => 0,
    }
}

/// Applies `SO_RCVTIMEO`. Zero is clamped up: std rejects a zero timeout,
/// and an unbounded blocking receive would break cooperative shutdown.
pub fn set_receive_timeout(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    let timeout = timeout.max(Duration::from_millis(1));
    stream.set_read_timeout(Some(timeout))
}

/// Toggles non-blocking mode.
pub fn set_blocking(stream: &TcpStream, blocking: bool) -> io::Result<()> {
    stream.set_nonblocking(!blocking)
}

/// Shuts down one or both directions; already-closed sockets report `Ok`.
pub fn shutdown(stream: &TcpStream, how: Shutdown) -> io::Result<()> {
    match stream.shutdown(how) {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

/// Thread-safe socket slot. Send, receive, shutdown and close all serialize
/// on the contained mutex, so no I/O can race a close. The socket closes
/// when the slot is dropped or [`MutexSocket::close`] is called, whichever
/// comes first.
#[derive(Debug, Default)]
pub struct MutexSocket {
    inner: Mutex<Option<TcpStream>>,
}

impl MutexSocket {
    /// An empty slot, to be filled by [`MutexSocket::set`] once connected.
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot holding an already-connected stream.
    pub fn with_stream(stream: TcpStream) -> Self {
        Self {
            inner: Mutex::new(Some(stream)),
        }
    }

    /// Fills an empty slot. A second call on an occupied slot is ignored.
    pub fn set(&self, stream: TcpStream) {
        let mut guard = self.inner.lock().unwrap();
        if guard.is_none() {
            *guard = Some(stream);
        }
    }

    /// Locks the slot for the duration of an I/O operation.
    pub fn lock(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.inner.lock().unwrap()
    }

    /// Whether a stream has been assigned.
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// Shuts the socket down both ways and closes it. Idempotent.
    pub fn close(&self) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(stream) = guard.take() {
            let _ = shutdown(&stream, Shutdown::Both);
        }
    }
}

impl fmt::Display for MutexSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner.lock().unwrap() {
            Some(stream) => match stream.peer_addr() {
                Ok(addr) => write!(f, "{addr}"),
                Err(_) => f.write_str("<unconnected>"),
            },
            None => f.write_str("<no socket>"),
        }
    }
}

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

//! Server-side TLS 1.2 adapter.
//!
//! Wraps a rustls [`ServerConnection`] behind the four lanes the stream
//! worker pumps: encrypted records in from the socket, encrypted records out
//! to the socket, plaintext in from the application, decrypted plaintext out
//! to the application. No rustls type leaks past this module apart from the
//! shared [`rustls::ServerConfig`] handle.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::fmt;

use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, ServerConnection, SupportedCipherSuite};
use thiserror::Error;

/// Cap on plaintext rustls will buffer for us before `push_plaintext`
/// reports a short write; keeps a slow peer from ballooning the session.
const SEND_PLAINTEXT_LIMIT: usize = 64 * 1024;

/// Cipher-suite profile for the server. The minimal profiles pin a single
/// TLS 1.2 suite to keep the negotiation surface small; `Full` offers
/// everything the provider has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherProfile {
    /// Forward-secret AES-128-GCM only.
    MinimalGcm,
    /// Forward-secret ChaCha20-Poly1305 only.
    MinimalChaCha20,
    /// AES-128-GCM without forward secrecy. rustls ships no such TLS 1.2
    /// key exchange, so this negotiates the same suite as
    /// [`CipherProfile::MinimalGcm`].
    MinimalNoFsGcm,
    /// All provider suites.
    Full,
}

/// Type of the server's private key, which decides the key-exchange family
/// of the pinned suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// RSA server key.
    Rsa,
    /// Elliptic-curve server key.
    Ec,
    /// Elliptic-curve server key with an RSA-signed issuer chain.
    EcMixed,
}

/// Everything needed to stand up the server side of TLS.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// Cipher-suite profile.
    pub profile: CipherProfile,
    /// Server key type.
    pub key_kind: KeyKind,
    /// PEM file with the certificate chain, leaf first.
    pub certificate_chain: PathBuf,
    /// PEM file with the private key.
    pub private_key: PathBuf,
}

/// Failures while building the TLS server configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Certificate or key file could not be read.
    #[error("failed to read certificate or key material: {0}")]
    Io(#[from] io::Error),
    /// The key file contained no usable private key.
    #[error("no private key found in {0}")]
    MissingKey(PathBuf),
    /// rustls rejected the configuration or key material.
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

fn suites_for(profile: CipherProfile, key_kind: KeyKind) -> Vec<SupportedCipherSuite> {
    use ring::cipher_suite as suite;

    match (profile, key_kind) {
        (CipherProfile::MinimalGcm | CipherProfile::MinimalNoFsGcm, KeyKind::Rsa) => {
            vec![suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256]
        }
        (CipherProfile::MinimalGcm | CipherProfile::MinimalNoFsGcm, KeyKind::Ec | KeyKind::EcMixed) => {
            vec![suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256]
        }
        (CipherProfile::MinimalChaCha20, KeyKind::Rsa) => {
            vec![suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256]
        }
        (CipherProfile::MinimalChaCha20, KeyKind::Ec | KeyKind::EcMixed) => {
            vec![suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256]
        }
        (CipherProfile::Full, _) => ring::DEFAULT_CIPHER_SUITES.to_vec(),
    }
}

fn load_certificates(path: &PathBuf) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    Ok(certs)
}

fn load_private_key(path: &PathBuf) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| TlsError::MissingKey(path.clone()))
}

/// Builds the shared server configuration: TLS 1.2 only, suites pinned per
/// profile and key type, no client authentication.
pub fn build_server_config(settings: &TlsSettings) -> Result<Arc<ServerConfig>, TlsError> {
    let mut provider = ring::default_provider();
    provider.cipher_suites = suites_for(settings.profile, settings.key_kind);

    let certs = load_certificates(&settings.certificate_chain)?;
    let key = load_private_key(&settings.private_key)?;

    let config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS12])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}

/// One connection's TLS engine state, owned by its stream worker.
pub struct TlsSession {
    conn: ServerConnection,
    peer_closed: bool,
}

impl fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSession")
            .field("peer_closed", &self.peer_closed)
            .field("wants_write", &self.conn.wants_write())
            .finish()
    }
}

impl TlsSession {
    /// Starts a fresh server-side session.
    pub fn new(config: Arc<ServerConfig>) -> Result<Self, TlsError> {
        let mut conn = ServerConnection::new(config)?;
        conn.set_buffer_limit(Some(SEND_PLAINTEXT_LIMIT));
        Ok(Self {
            conn,
            peer_closed: false,
        })
    }

    /// Whether encrypted records are waiting to be written to the socket.
    pub fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    /// Sends pending encrypted records into `io` (the socket).
    pub fn write_records(&mut self, io: &mut dyn Write) -> io::Result<usize> {
        self.conn.write_tls(io)
    }

    /// Feeds encrypted records from `io` (the socket) into the engine and
    /// processes them. Handshake faults and record corruption surface as
    /// `InvalidData`.
    pub fn read_records(&mut self, io: &mut dyn Read) -> io::Result<usize> {
        let n = self.conn.read_tls(io)?;
        match self.conn.process_new_packets() {
            Ok(state) => {
                if state.peer_has_closed() {
                    self.peer_closed = true;
                }
                Ok(n)
            }
            Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }

    /// Queues application plaintext for encryption. Returns how many bytes
    /// the engine accepted; the caller keeps the rest buffered.
    pub fn push_plaintext(&mut self, data: &[u8]) -> io::Result<usize> {
        self.conn.writer().write(data)
    }

    /// Reads decrypted plaintext. `WouldBlock` means nothing is available
    /// right now; `Ok(0)` means the peer cleanly closed the session.
    pub fn pull_plaintext(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.conn.reader().read(out)
    }

    /// Whether the peer has closed the TLS session.
    pub fn is_closed(&self) -> bool {
        self.peer_closed
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::{build_server_config, suites_for, CipherProfile, KeyKind, TlsError, TlsSettings};

    #[test]
    fn minimal_profiles_pin_exactly_one_suite() {
        for profile in [
            CipherProfile::MinimalGcm,
            CipherProfile::MinimalChaCha20,
            CipherProfile::MinimalNoFsGcm,
        ] {
            for key in [KeyKind::Rsa, KeyKind::Ec, KeyKind::EcMixed] {
                assert_eq!(1, suites_for(profile, key).len());
            }
        }
    }

    #[test]
    fn full_profile_offers_more_than_one_suite() {
        assert!(suites_for(CipherProfile::Full, KeyKind::Rsa).len() > 1);
    }

    #[test]
    fn ec_and_mixed_keys_select_ecdsa_suites() {
        let ec = suites_for(CipherProfile::MinimalGcm, KeyKind::Ec);
        let mixed = suites_for(CipherProfile::MinimalGcm, KeyKind::EcMixed);
        let rsa = suites_for(CipherProfile::MinimalGcm, KeyKind::Rsa);
        assert_eq!(ec[0].suite(), mixed[0].suite());
        assert_ne!(ec[0].suite(), rsa[0].suite());
    }

    #[test]
    fn missing_certificate_file_reports_io_error() {
        let settings = TlsSettings {
            profile: CipherProfile::MinimalGcm,
            key_kind: KeyKind::Rsa,
            certificate_chain: PathBuf::from("/nonexistent/cert.pem"),
            private_key: PathBuf::from("/nonexistent/key.pem"),
        };
        assert!(matches!(
            build_server_config(&settings),
            Err(TlsError::Io(_))
        ));
    }
}

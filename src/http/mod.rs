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

//! HTTP/1.1 application layer: request/response model, incremental parser,
//! filesystem responder and the server driving them.

use std::fmt;

use tracing::warn;

pub mod filesystem;
pub mod parser;
pub mod server;
pub(crate) mod spa;

/// Requested HTTP method.
/// [IETF RFC 9110 Section 9](https://www.rfc-editor.org/rfc/rfc9110#section-9)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// RFC 9110 9.3.1
    Get,
    /// RFC 9110 9.3.2
    Head,
    /// RFC 9110 9.3.3
    Post,
    /// RFC 9110 9.3.4
    Put,
    /// RFC 9110 9.3.5
    Delete,
    /// RFC 9110 9.3.6
    Connect,
    /// RFC 9110 9.3.7
    Options,
    /// RFC 9110 9.3.8
    Trace,
    /// RFC 5789
    Patch,
    /// Token did not resolve to a known method.
    #[default]
    Unrecognized,
    /// Handler-binding wildcard; never produced by parsing.
    Any,
}

impl Method {
    /// Resolves a request-line token. Resolution is by the first two
    /// bytes, which is unambiguous over the known methods and cheap enough
    /// for the completeness probe to call repeatedly; the full parse
    /// separately rejects tokens longer than any real method.
    pub fn from_token(token: &[u8]) -> Method {
        if token.len() < 2 {
            return Method::Unrecognized;
        }
        match &token[..2] {
            b"GE" => Method::Get,
            b"HE" => Method::Head,
            b"PO" => Method::Post,
            b"PU" => Method::Put,
            b"DE" => Method::Delete,
            b"CO" => Method::Connect,
            b"OP" => Method::Options,
            b"TR" => Method::Trace,
            b"PA" => Method::Patch,
            _ => Method::Unrecognized,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
            Self::Unrecognized => "UNRECOGNIZED",
            Self::Any => "ANY",
        })
    }
}

/// Response status codes the server produces.
/// [RFC 9110 Section 15](https://www.rfc-editor.org/rfc/rfc9110#section-15)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Placeholder before a task has decided anything.
    Unrecognized = 99,
    /// 15.3.1
    Ok = 200,
    /// 15.3.2
    Created = 201,
    /// 15.3.3
    Accepted = 202,
    /// 15.3.5
    NoContent = 204,
    /// 15.4.8
    TemporaryRedirect = 307,
    /// 15.4.9
    PermanentRedirect = 308,
    /// 15.5.1
    BadRequest = 400,
    /// 15.5.2
    Unauthorized = 401,
    /// 15.5.4
    Forbidden = 403,
    /// 15.5.5
    NotFound = 404,
    /// 15.5.6
    MethodNotAllowed = 405,
    /// 15.5.7
    NotAcceptable = 406,
    /// 15.5.9
    RequestTimeout = 408,
    /// 15.5.12
    LengthRequired = 411,
    /// 15.5.14
    PayloadTooLarge = 413,
    /// 15.5.15
    UriTooLong = 414,
    /// 15.5.16
    UnsupportedMediaType = 415,
    /// RFC 2324
    ImATeapot = 418,
    /// 15.5.22
    UpgradeRequired = 426,
    /// RFC 6585
    TooManyRequests = 429,
    /// 15.6.1
    InternalServerError = 500,
    /// 15.6.2
    NotImplemented = 501,
    /// 15.6.4
    ServiceUnavailable = 503,
    /// 15.6.6
    HttpVersionNotSupported = 505,
}

impl StatusCode {
    /// Numeric status code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Canonical reason phrase.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Unrecognized => "Unrecognized",
            Self::Ok => "OK",
            Self::Created => "Created",
            Self::Accepted => "Accepted",
            Self::NoContent => "No Content",
            Self::TemporaryRedirect => "Temporary Redirect",
            Self::PermanentRedirect => "Permanent Redirect",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::NotAcceptable => "Not Acceptable",
            Self::RequestTimeout => "Request Timeout",
            Self::LengthRequired => "Length Required",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::UriTooLong => "URI Too Long",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::ImATeapot => "I'm a teapot",
            Self::UpgradeRequired => "Upgrade Required",
            Self::TooManyRequests => "Too Many Requests",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// Whether this is a client or server error.
    pub fn is_error(self) -> bool {
        self.code() >= 400
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// A parsed request: method, absolute-path URL, raw header field lines in
/// arrival order, and the payload bytes after the blank line.
#[derive(Debug, Default)]
pub struct HttpRequest {
    /// Resolved request method.
    pub method: Method,
    /// Request target in absolute-path form.
    pub url: String,
    /// Header field lines, one `Name: Value` per entry, unvalidated.
    pub header_fields: Vec<String>,
    /// Payload bytes following the header section.
    pub payload: Vec<u8>,
}

impl HttpRequest {
    /// Value of the first header field whose name matches, with the colon
    /// separator and leading spaces trimmed. Names match case-sensitively,
    /// as sent by the bootstrap script this exists for.
    pub fn header_value(&self, name: &str) -> Option<String> {
        for field in &self.header_fields {
            let rest = match field.strip_prefix(name) {
                Some(rest) => rest,
                None => continue,
            };
            let value = match rest.strip_prefix(':') {
                Some(value) => value,
                None => continue,
            };
            return Some(value.trim_start_matches(' ').to_string());
        }
        None
    }

    /// Compact one-line rendering for logs.
    pub fn short_string(&self) -> String {
        let mut url: &str = &self.url;
        let mut truncated = "";
        if url.len() > 60 {
            url = &url[..60];
            truncated = "...";
        }
        format!("{} {}{}", self.method, url, truncated)
    }
}

/// A response under construction by a handler. `Content-Length` is always
/// computed during serialization and cannot be set manually.
#[derive(Debug)]
pub struct HttpResponse {
    /// Status line code.
    pub status: StatusCode,
    /// Header field lines in output order.
    pub header_fields: Vec<String>,
    /// Response body.
    pub payload: Vec<u8>,
    /// `false` lets a handler decline the request so later bindings run.
    pub handled: bool,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

impl HttpResponse {
    /// An empty, handled response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            header_fields: Vec::new(),
            payload: Vec::new(),
            handled: true,
        }
    }

    /// A handled response carrying a payload.
    pub fn with_payload(status: StatusCode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::new(status)
        }
    }

    /// The stock error page: the status line repeated as an HTML body.
    pub fn error(status: StatusCode) -> Self {
        let mut response = Self::with_payload(status, status.to_string());
        response.add_header_field("Content-Type", "text/html; charset=utf-8");
        response
    }

    /// A response that declines the request, letting the next matching
    /// handler binding run.
    pub fn unhandled() -> Self {
        Self {
            handled: false,
            ..Self::new(StatusCode::NotFound)
        }
    }

    /// Appends a header field line. `Content-Length` is rejected, it is
    /// computed during serialization.
    pub fn add_header_field(&mut self, name: &str, value: &str) {
        let name = name.trim_end_matches(':');
        if name == "Content-Length" {
            warn!("Content-Length is computed during serialization, field ignored");
            return;
        }
        self.header_fields.push(format!("{name}: {value}"));
    }

    /// Serializes the status line, header fields, the computed
    /// `Content-Length` and the payload into wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.payload.len());
        out.extend_from_slice(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());
        for field in &self.header_fields {
            if field.starts_with("Content-Length") {
                continue;
            }
            out.extend_from_slice(field.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.payload.len()).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.payload);
        out
    }
}

/// A registered `(method, function)` pair. Bindings are walked in
/// registration order; [`Method::Any`] matches every request method.
pub struct HandlerBinding {
    method: Method,
    execute: Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>,
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("method", &self.method)
            .finish()
    }
}

impl HandlerBinding {
    /// Binds `handler` to requests of `method`.
    pub fn new(
        method: Method,
        handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            method,
            execute: Box::new(handler),
        }
    }

    /// Whether this binding applies to a request of `method`.
    pub fn matches(&self, method: Method) -> bool {
        self.method == Method::Any || self.method == method
    }

    /// Runs the bound handler.
    pub fn execute(&self, request: &HttpRequest) -> HttpResponse {
        (self.execute)(request)
    }
}

#[cfg(test)]
mod test {
    use super::{HttpRequest, HttpResponse, Method, StatusCode};

    #[test]
    fn method_tokens_resolve_and_render() {
        for (token, method) in [
            (&b"GET"[..], Method::Get),
            (b"HEAD", Method::Head),
            (b"POST", Method::Post),
            (b"PUT", Method::Put),
            (b"DELETE", Method::Delete),
            (b"CONNECT", Method::Connect),
            (b"OPTIONS", Method::Options),
            (b"TRACE", Method::Trace),
            (b"PATCH", Method::Patch),
        ] {
            assert_eq!(method, Method::from_token(token));
            assert_eq!(std::str::from_utf8(token).unwrap(), method.to_string());
        }
        assert_eq!(Method::Unrecognized, Method::from_token(b"BREW"));
        assert_eq!(Method::Unrecognized, Method::from_token(b"G"));
    }

    #[test]
    fn status_codes_render_code_and_reason() {
        assert_eq!("200 OK", StatusCode::Ok.to_string());
        assert_eq!("404 Not Found", StatusCode::NotFound.to_string());
        assert!(StatusCode::NotFound.is_error());
        assert!(!StatusCode::NoContent.is_error());
    }

    #[test]
    fn serialization_contains_exactly_one_content_length() {
        let mut response = HttpResponse::with_payload(StatusCode::Ok, "Hello from the server!");
        response.add_header_field("Content-Type", "text/plain; charset=utf-8");
        // A handler trying to set it manually is ignored.
        response.add_header_field("Content-Length", "9999");

        let wire = String::from_utf8(response.serialize()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(1, wire.matches("Content-Length").count());
        assert!(wire.contains("Content-Length: 22\r\n"));
        assert!(wire.ends_with("\r\n\r\nHello from the server!"));
    }

    #[test]
    fn serialization_is_idempotent() {
        let mut response = HttpResponse::with_payload(StatusCode::Ok, "abc");
        response.add_header_field("Content-Type", "text/plain; charset=utf-8");
        assert_eq!(response.serialize(), response.serialize());
    }

    #[test]
    fn error_response_payload_is_the_status_line() {
        let response = HttpResponse::error(StatusCode::NotFound);
        assert_eq!(b"404 Not Found", response.payload.as_slice());
        assert!(response.handled);
    }

    #[test]
    fn header_value_trims_separator_and_spaces() {
        let request = HttpRequest {
            header_fields: vec![
                "Host: example.org".into(),
                "X-Requested-With:   SPA".into(),
            ],
            ..HttpRequest::default()
        };
        assert_eq!(Some("SPA".into()), request.header_value("X-Requested-With"));
        assert_eq!(Some("example.org".into()), request.header_value("Host"));
        assert_eq!(None, request.header_value("Cookie"));
    }

    #[test]
    fn short_string_truncates_long_urls() {
        let request = HttpRequest {
            method: Method::Get,
            url: "/".repeat(100),
            ..HttpRequest::default()
        };
        let short = request.short_string();
        assert!(short.starts_with("GET /"));
        assert!(short.ends_with("..."));
        assert!(short.len() < 70);
    }
}

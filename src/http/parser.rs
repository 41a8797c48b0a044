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

//! Incremental, timeout-bounded request parsing.
//!
//! Parsing runs in two phases to defend against slow clients: a cheap
//! completeness probe called repeatedly while bytes trickle in, and a full
//! parse run once the probe reports a complete request line. The full parse
//! is total: it always produces a status plus a (possibly partial) request,
//! and never panics on malformed input.

use std::time::Duration;

use memchr::{memchr, memmem};

use super::{HttpRequest, Method, StatusCode};

/// Longest accepted URL, in bytes. At exactly this length a request is
/// still accepted; one byte more answers 414.
pub const URL_MAX: usize = 9000;

/// Longest accepted method token; longer tokens answer 405.
pub const METHOD_MAX: usize = 7;

/// Most header field lines read before the request is rejected.
pub const HEADER_LINES_MAX: usize = 200;

/// Budget for a request head to arrive completely, counted from the first
/// received byte; expiry answers 400.
pub const HEADER_TIMEOUT: Duration = Duration::from_secs(3);

/// Smallest request head worth probing eagerly; shorter fragments get a
/// short grace period before a task is dispatched for them.
pub(crate) const REQUEST_MIN_LEN: usize = 26;

/// Without a space this early, no method token is coming.
const NO_METHOD_PROBE_LEN: usize = 8;

/// Bytes tolerated after the URL without a CRLF before giving up on the
/// request line ever terminating.
const NO_TERMINATOR_SLACK: usize = 14;

/// Completeness verdict for a partially received request head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// The buffer can no longer become a valid request; answer 400.
    Bad,
    /// Keep receiving.
    Partial,
    /// The request line is complete; run the full parse.
    Full,
}

/// Cheap completeness check over whatever has been received so far.
pub fn probe_request(buf: &[u8]) -> ProbeStatus {
    let Some(method_end) = memchr(b' ', buf) else {
        return if buf.len() >= NO_METHOD_PROBE_LEN {
            ProbeStatus::Bad
        } else {
            ProbeStatus::Partial
        };
    };
    if Method::from_token(&buf[..method_end]) == Method::Unrecognized {
        return ProbeStatus::Bad;
    }

    let rest = &buf[method_end + 1..];
    let Some(url_end) = memchr(b' ', rest) else {
        return if rest.len() > URL_MAX {
            ProbeStatus::Bad
        } else {
            ProbeStatus::Partial
        };
    };
    // An over-long URL that did terminate still probes complete; the full
    // parse is what answers 414 for it.

    let after_url = &rest[url_end..];
    if memmem::find(after_url, b"\r\n").is_some() {
        ProbeStatus::Full
    } else if after_url.len() >= NO_TERMINATOR_SLACK {
        ProbeStatus::Bad
    } else {
        ProbeStatus::Partial
    }
}

/// Full parse of a received request head (and payload, if present).
///
/// Always returns a status and the request as far as it got; a non-OK
/// status maps directly onto the error response for the connection.
pub fn parse_request(buf: &[u8]) -> (StatusCode, HttpRequest) {
    let mut request = HttpRequest::default();

    let Some(method_end) = memchr(b' ', buf) else {
        return (StatusCode::BadRequest, request);
    };
    let token = &buf[..method_end];
    if token.len() > METHOD_MAX {
        return (StatusCode::MethodNotAllowed, request);
    }
    request.method = Method::from_token(token);
    if request.method == Method::Unrecognized {
        return (StatusCode::BadRequest, request);
    }

    // URL, with stray spaces around it dropped.
    let mut pos = method_end;
    while buf.get(pos) == Some(&b' ') {
        pos += 1;
    }
    let line_end = memmem::find(&buf[pos..], b"\r\n")
        .map(|i| pos + i)
        .unwrap_or(buf.len());
    let url_end = memchr(b' ', &buf[pos..line_end])
        .map(|i| pos + i)
        .unwrap_or(line_end);
    if url_end - pos > URL_MAX {
        return (StatusCode::UriTooLong, request);
    }
    request.url = String::from_utf8_lossy(&buf[pos..url_end])
        .trim_matches(' ')
        .to_string();
    if request.url.is_empty() {
        return (StatusCode::BadRequest, request);
    }

    // Header field lines up to the first blank line. Names are stored as
    // raw lines and not token-validated.
    let mut cursor = (line_end + 2).min(buf.len());
    let mut payload_start = None;
    while cursor < buf.len() {
        let Some(eol) = memmem::find(&buf[cursor..], b"\r\n").map(|i| cursor + i) else {
            // Trailing partial line; keep what is there.
            request
                .header_fields
                .push(String::from_utf8_lossy(&buf[cursor..]).to_string());
            break;
        };
        if eol == cursor {
            payload_start = Some(eol + 2);
            break;
        }
        if request.header_fields.len() >= HEADER_LINES_MAX {
            return (StatusCode::BadRequest, request);
        }
        request
            .header_fields
            .push(String::from_utf8_lossy(&buf[cursor..eol]).to_string());
        cursor = eol + 2;
    }

    if let Some(start) = payload_start {
        request.payload = buf[start..].to_vec();
    }
    if !request.payload.is_empty() && request.header_value("Content-Length").is_none() {
        return (StatusCode::LengthRequired, request);
    }

    (StatusCode::Ok, request)
}

#[cfg(test)]
mod test {
    use super::{parse_request, probe_request, ProbeStatus, HEADER_LINES_MAX, URL_MAX};
    use crate::http::{Method, StatusCode};

    #[test]
    fn short_fragment_without_whitespace_is_partial() {
        assert_eq!(ProbeStatus::Partial, probe_request(b"GE"));
        assert_eq!(ProbeStatus::Partial, probe_request(b"GET"));
    }

    #[test]
    fn long_fragment_without_whitespace_is_bad() {
        assert_eq!(ProbeStatus::Bad, probe_request(b"GETGETGE"));
    }

    #[test]
    fn unknown_method_is_bad_immediately() {
        assert_eq!(ProbeStatus::Bad, probe_request(b"BREW /coffee"));
    }

    #[test]
    fn complete_request_line_is_full() {
        assert_eq!(ProbeStatus::Full, probe_request(b"GET / HTTP/1.1\r\n"));
        assert_eq!(
            ProbeStatus::Full,
            probe_request(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
        );
    }

    #[test]
    fn request_line_without_terminator_is_partial_within_slack() {
        assert_eq!(ProbeStatus::Partial, probe_request(b"GET / HTTP/1.1"));
        let overlong = b"GET / HTTP/1.1 and then some trailing junk";
        assert_eq!(ProbeStatus::Bad, probe_request(overlong));
    }

    #[test]
    fn url_at_the_limit_is_accepted_one_past_is_rejected() {
        let mut at_limit = b"GET /".to_vec();
        at_limit.extend(std::iter::repeat(b'a').take(URL_MAX - 1));
        at_limit.extend(b" HTTP/1.1\r\n\r\n");
        let (status, request) = parse_request(&at_limit);
        assert_eq!(StatusCode::Ok, status);
        assert_eq!(URL_MAX, request.url.len());
        assert_eq!(ProbeStatus::Full, probe_request(&at_limit));

        let mut past_limit = b"GET /".to_vec();
        past_limit.extend(std::iter::repeat(b'a').take(URL_MAX));
        past_limit.extend(b" HTTP/1.1\r\n\r\n");
        // Complete but over-long: probes full so the parse can answer 414.
        assert_eq!(ProbeStatus::Full, probe_request(&past_limit));
        let (status, _) = parse_request(&past_limit);
        assert_eq!(StatusCode::UriTooLong, status);
    }

    #[test]
    fn unterminated_overlong_url_is_bad_in_the_probe() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(URL_MAX + 1));
        assert_eq!(ProbeStatus::Bad, probe_request(&raw));
    }

    #[test]
    fn method_token_of_seven_is_accepted_eight_is_rejected() {
        let (status, request) = parse_request(b"OPTIONS / HTTP/1.1\r\n\r\n");
        assert_eq!(StatusCode::Ok, status);
        assert_eq!(Method::Options, request.method);

        // Resolves by prefix but is too long to be a real method.
        let (status, _) = parse_request(b"OPTIONSX / HTTP/1.1\r\n\r\n");
        assert_eq!(StatusCode::MethodNotAllowed, status);
    }

    #[test]
    fn header_fields_are_captured_in_order() {
        let (status, request) =
            parse_request(b"GET /x HTTP/1.1\r\nHost: a\r\nAccept: */*\r\n\r\n");
        assert_eq!(StatusCode::Ok, status);
        assert_eq!(
            vec!["Host: a".to_string(), "Accept: */*".to_string()],
            request.header_fields
        );
        assert!(request.payload.is_empty());
    }

    #[test]
    fn too_many_header_lines_are_rejected() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=HEADER_LINES_MAX {
            raw.extend(format!("X-Filler-{i}: x\r\n").as_bytes());
        }
        raw.extend(b"\r\n");
        let (status, _) = parse_request(&raw);
        assert_eq!(StatusCode::BadRequest, status);
    }

    #[test]
    fn payload_is_captured_after_the_blank_line() {
        let (status, request) =
            parse_request(b"POST /submit HTTP/1.1\r\nContent-Length: 4\r\n\r\nBODY");
        assert_eq!(StatusCode::Ok, status);
        assert_eq!(b"BODY", request.payload.as_slice());
    }

    #[test]
    fn payload_without_content_length_requires_length() {
        let (status, _) = parse_request(b"POST /submit HTTP/1.1\r\nHost: a\r\n\r\nBODY");
        assert_eq!(StatusCode::LengthRequired, status);
    }

    #[test]
    fn stray_spaces_around_the_url_are_stripped() {
        let (status, request) = parse_request(b"GET   /page   HTTP/1.1\r\n\r\n");
        assert_eq!(StatusCode::Ok, status);
        assert_eq!("/page", request.url);
    }

    #[test]
    fn parse_is_total_on_garbage() {
        for garbage in [
            &b""[..],
            b" ",
            b"\r\n",
            b"GET",
            b"GET \r\n",
            b"\xff\xfe \x00\r\n\r\n",
        ] {
            let (status, _) = parse_request(garbage);
            assert_ne!(StatusCode::Ok, status);
        }
    }
}

//! HTTP/1.x framing on an accepted client connection.
//!
//! # Responsibilities
//! - Read and parse a request head (request line + headers)
//! - Read a fixed-length request body
//! - Upgrade a `CONNECT` tunnel to TLS and keep reading inside it
//! - Write a complete response and close the connection
//!
//! One connection carries exactly one transaction: every response goes out
//! with `Connection: close` and the socket is shut down afterwards. Dropping a
//! `ClientConnection` closes the socket on every other exit path.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::uri::{Authority, Scheme};
use http::{Method, StatusCode, Uri, Version};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{ProxyError, Result};
use crate::net::tls::{self, CertificateSource};

const MAX_HEADERS: usize = 64;

/// Headers that describe one hop and are never relayed.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Anything a client connection can run over: plain TCP or decrypted TLS.
pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ClientStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Size limits applied to message heads and bodies.
#[derive(Debug, Clone, Copy)]
pub struct FramingLimits {
    pub max_header_bytes: usize,
    /// Client request bodies.
    pub max_body_bytes: u64,
    /// Origin response bodies.
    pub max_response_body_bytes: u64,
}

impl Default for FramingLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 16 * 1024 * 1024,
            max_response_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// A parsed request line and header block.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// The request target exactly as sent (absolute, origin or authority form).
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    /// Declared `Content-Length`, if present and well-formed.
    pub fn content_length(&self) -> Option<u64> {
        content_length(&self.headers)
    }
}

/// The client side of one transaction.
pub struct ClientConnection {
    reader: BufReader<Box<dyn ClientStream>>,
    peer: SocketAddr,
    limits: FramingLimits,
    /// Authority from the `CONNECT` line once the stream carries TLS.
    tunnel_authority: Option<String>,
}

impl ClientConnection {
    pub fn new(stream: impl ClientStream + 'static, peer: SocketAddr, limits: FramingLimits) -> Self {
        Self {
            reader: BufReader::new(Box::new(stream)),
            peer,
            limits,
            tunnel_authority: None,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// True once the connection has been upgraded after `CONNECT`.
    pub fn is_tls(&self) -> bool {
        self.tunnel_authority.is_some()
    }

    /// Read the next request head.
    ///
    /// Returns `Ok(None)` when the client sent nothing usable: EOF before a
    /// complete head, an oversized head, or bytes that do not parse as HTTP.
    pub async fn read_request(&mut self) -> Result<Option<RequestHead>> {
        let mut buf = Vec::with_capacity(1024);
        loop {
            // One byte past the limit is enough to tell the head is too large.
            let budget = (self.limits.max_header_bytes + 1).saturating_sub(buf.len()) as u64;
            let n = (&mut self.reader).take(budget).read_until(b'\n', &mut buf).await?;
            if n == 0 {
                if !buf.is_empty() {
                    tracing::debug!(peer = %self.peer, "Client closed mid-head");
                }
                return Ok(None);
            }
            // Tolerate stray line breaks before the request line.
            if buf == b"\r\n" || buf == b"\n" {
                buf.clear();
                continue;
            }
            if buf.len() > self.limits.max_header_bytes {
                tracing::debug!(peer = %self.peer, limit = self.limits.max_header_bytes, "Request head too large");
                return Ok(None);
            }
            if buf.ends_with(b"\r\n\r\n") || buf.ends_with(b"\n\n") {
                break;
            }
        }
        Ok(parse_head(&buf))
    }

    /// Read exactly `len` body bytes from the client.
    pub async fn read_body(&mut self, len: u64) -> Result<Bytes> {
        if len > self.limits.max_body_bytes {
            return Err(ProxyError::BodyTooLarge {
                declared: len,
                limit: self.limits.max_body_bytes,
            });
        }
        let mut body = vec![0u8; len as usize];
        self.reader.read_exact(&mut body).await?;
        Ok(Bytes::from(body))
    }

    /// Acknowledge a `CONNECT` and terminate TLS for `authority`.
    ///
    /// The returned connection reads the tunnelled (decrypted) requests.
    pub async fn upgrade_tls(self, source: &dyn CertificateSource, authority: &str) -> Result<Self> {
        let Self {
            mut reader,
            peer,
            limits,
            ..
        } = self;

        if !reader.buffer().is_empty() {
            return Err(ProxyError::Tls(
                "client sent data before the tunnel was established".to_string(),
            ));
        }

        let stream = reader.get_mut();
        stream
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await?;
        stream.flush().await?;

        let host = authority_host(authority);
        let tls_stream = tls::accept(source, host, reader.into_inner()).await?;
        tracing::debug!(peer = %peer, authority = %authority, "TLS tunnel established");

        Ok(Self {
            reader: BufReader::new(Box::new(tls_stream)),
            peer,
            limits,
            tunnel_authority: Some(authority.to_string()),
        })
    }

    /// Resolve the absolute URI a request head is addressed to.
    ///
    /// Absolute-form targets are used as-is. Origin-form targets are anchored
    /// at the `Host` header (or the tunnel authority), with `https` inside a
    /// TLS tunnel and `http` otherwise.
    pub fn resolve_uri(&self, head: &RequestHead) -> Option<Uri> {
        if head.target.starts_with('/') {
            let host = head
                .headers
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .or_else(|| self.tunnel_authority.clone())?;
            let scheme = if self.is_tls() { Scheme::HTTPS } else { Scheme::HTTP };
            return Uri::builder()
                .scheme(scheme)
                .authority(Authority::try_from(host.as_str()).ok()?)
                .path_and_query(head.target.as_str())
                .build()
                .ok();
        }

        let uri: Uri = head.target.parse().ok()?;
        match (uri.scheme(), uri.authority()) {
            (Some(_), Some(_)) => Some(uri),
            _ => None,
        }
    }

    /// Write a complete response and close the write side.
    ///
    /// Framing headers are rewritten: `Content-Length` always matches `body`
    /// and the connection is marked `close`. Replies that cannot carry a body
    /// (see [`response_has_body`]) keep the origin's `Content-Length` and are
    /// written without one.
    pub async fn send_response(
        &mut self,
        request_method: &Method,
        status: StatusCode,
        headers: &HeaderMap,
        body: Option<&Bytes>,
    ) -> Result<()> {
        let has_body = response_has_body(request_method, status);
        let body = body.filter(|_| has_body);
        let body_len = body.map(|b| b.len()).unwrap_or(0);
        let mut out = Vec::with_capacity(256 + body_len);

        out.extend_from_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )
            .as_bytes(),
        );
        for (name, value) in headers.iter() {
            if (name == CONTENT_LENGTH && has_body) || is_hop_by_hop(name) {
                continue;
            }
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if has_body {
            out.extend_from_slice(format!("content-length: {body_len}\r\n").as_bytes());
        }
        out.extend_from_slice(b"connection: close\r\n\r\n");
        if let Some(body) = body {
            out.extend_from_slice(body);
        }

        let stream = self.reader.get_mut();
        stream.write_all(&out).await?;
        stream.flush().await?;
        stream.shutdown().await?;
        Ok(())
    }
}

fn parse_head(buf: &[u8]) -> Option<RequestHead> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return None,
        Err(e) => {
            tracing::debug!(error = %e, "Malformed request head");
            return None;
        }
    }

    let method = Method::from_bytes(req.method?.as_bytes()).ok()?;
    let target = req.path?.to_string();
    let version = match req.version? {
        0 => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut header_map = HeaderMap::with_capacity(req.headers.len());
    for header in req.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes()).ok()?;
        let value = HeaderValue::from_bytes(header.value).ok()?;
        header_map.append(name, value);
    }

    Some(RequestHead {
        method,
        target,
        version,
        headers: header_map,
    })
}

/// False for replies whose framing never includes a body: answers to `HEAD`,
/// `1xx`, `204` and `304`.
pub fn response_has_body(request_method: &Method, status: StatusCode) -> bool {
    request_method != Method::HEAD
        && !status.is_informational()
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
}

/// Parse `Content-Length`; `None` when absent or not a number.
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(TRANSFER_ENCODING);
}

fn authority_host(authority: &str) -> &str {
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.trim_matches(['[', ']']),
        _ => authority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn peer() -> SocketAddr {
        "127.0.0.1:41000".parse().unwrap()
    }

    async fn connection_with(input: &'static [u8]) -> (ClientConnection, tokio::io::DuplexStream) {
        let (client, server) = duplex(64 * 1024);
        let mut client = client;
        client.write_all(input).await.unwrap();
        (ClientConnection::new(server, peer(), FramingLimits::default()), client)
    }

    #[tokio::test]
    async fn reads_absolute_form_request() {
        let (mut conn, _client) = connection_with(
            b"GET http://example.test/index.html?q=1 HTTP/1.1\r\nHost: example.test\r\nX-Trace: a\r\nX-Trace: b\r\n\r\n",
        )
        .await;

        let head = conn.read_request().await.unwrap().expect("head");
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(head.headers.get_all("x-trace").iter().count(), 2);

        let uri = conn.resolve_uri(&head).unwrap();
        assert_eq!(uri.to_string(), "http://example.test/index.html?q=1");
    }

    #[tokio::test]
    async fn origin_form_uses_host_header() {
        let (mut conn, _client) =
            connection_with(b"POST /submit HTTP/1.0\r\nHost: backend.local:8080\r\nContent-Length: 4\r\n\r\nabcd").await;

        let head = conn.read_request().await.unwrap().unwrap();
        assert_eq!(head.version, Version::HTTP_10);
        assert_eq!(head.content_length(), Some(4));
        assert_eq!(
            conn.resolve_uri(&head).unwrap().to_string(),
            "http://backend.local:8080/submit"
        );
        assert_eq!(conn.read_body(4).await.unwrap(), Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn origin_form_without_host_is_unresolvable() {
        let (mut conn, _client) = connection_with(b"GET /nohost HTTP/1.1\r\n\r\n").await;
        let head = conn.read_request().await.unwrap().unwrap();
        assert!(conn.resolve_uri(&head).is_none());
    }

    #[tokio::test]
    async fn garbage_is_not_a_request() {
        let (mut conn, _client) = connection_with(b"\x16\x03\x01 not http at all\r\n\r\n").await;
        assert!(conn.read_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_before_head_is_none() {
        let (client, server) = duplex(1024);
        drop(client);
        let mut conn = ClientConnection::new(server, peer(), FramingLimits::default());
        assert!(conn.read_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let (client, server) = duplex(64 * 1024);
        let mut client = client;
        let limits = FramingLimits {
            max_header_bytes: 64,
            max_body_bytes: 1024,
            ..FramingLimits::default()
        };
        let mut conn = ClientConnection::new(server, peer(), limits);
        let mut request = b"GET http://example.test/ HTTP/1.1\r\n".to_vec();
        request.extend_from_slice(format!("X-Padding: {}\r\n\r\n", "x".repeat(200)).as_bytes());
        client.write_all(&request).await.unwrap();

        assert!(conn.read_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn body_over_limit_is_an_error() {
        let (_client, server) = duplex(1024);
        let limits = FramingLimits {
            max_header_bytes: 1024,
            max_body_bytes: 8,
            ..FramingLimits::default()
        };
        let mut conn = ClientConnection::new(server, peer(), limits);
        assert!(matches!(
            conn.read_body(9).await,
            Err(ProxyError::BodyTooLarge { declared: 9, limit: 8 })
        ));
    }

    #[tokio::test]
    async fn response_framing_is_rewritten() {
        let (mut client, server) = duplex(64 * 1024);
        let mut conn = ClientConnection::new(server, peer(), FramingLimits::default());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("999"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("x-origin", HeaderValue::from_static("mock"));
        let body = Bytes::from_static(b"HELLO");
        conn.send_response(&Method::GET, StatusCode::OK, &headers, Some(&body))
            .await
            .unwrap();
        drop(conn);

        let mut raw = String::new();
        client.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains("x-origin: mock\r\n"));
        assert!(raw.contains("content-length: 5\r\n"));
        assert!(!raw.contains("999"));
        assert!(!raw.contains("chunked"));
        assert!(raw.ends_with("\r\n\r\nHELLO"));
    }

    #[tokio::test]
    async fn head_reply_keeps_origin_length_and_has_no_body() {
        let (mut client, server) = duplex(64 * 1024);
        let mut conn = ClientConnection::new(server, peer(), FramingLimits::default());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1234"));
        let stray = Bytes::from_static(b"ignored");
        conn.send_response(&Method::HEAD, StatusCode::OK, &headers, Some(&stray))
            .await
            .unwrap();
        drop(conn);

        let mut raw = String::new();
        client.read_to_string(&mut raw).await.unwrap();
        assert_eq!(
            raw,
            "HTTP/1.1 200 OK\r\ncontent-length: 1234\r\nconnection: close\r\n\r\n"
        );
    }

    #[test]
    fn bodyless_replies() {
        assert!(!response_has_body(&Method::HEAD, StatusCode::OK));
        assert!(!response_has_body(&Method::GET, StatusCode::NOT_MODIFIED));
        assert!(!response_has_body(&Method::GET, StatusCode::NO_CONTENT));
        assert!(!response_has_body(&Method::GET, StatusCode::CONTINUE));
        assert!(response_has_body(&Method::GET, StatusCode::NOT_FOUND));
        assert!(response_has_body(&Method::POST, StatusCode::OK));
    }

    #[test]
    fn strips_proxy_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        headers.insert("authorization", HeaderValue::from_static("Bearer origin-token"));

        strip_hop_by_hop(&mut headers);
        assert!(!headers.contains_key("proxy-authorization"));
        assert!(headers.contains_key("authorization"));
    }

    #[test]
    fn strips_connection_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-secret"));
        headers.insert("x-secret", HeaderValue::from_static("1"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-kept", HeaderValue::from_static("1"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-kept"));
    }

    #[test]
    fn authority_host_drops_port() {
        assert_eq!(authority_host("example.com:443"), "example.com");
        assert_eq!(authority_host("[::1]:8443"), "::1");
        assert_eq!(authority_host("example.com"), "example.com");
    }
}

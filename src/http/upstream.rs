//! Upstream forwarding.
//!
//! # Responsibilities
//! - Submit an intercepted request to its real origin (HTTP or HTTPS)
//! - Classify failures: the origin is unreachable, or it spoke broken HTTP
//! - Collect the full response body for the response hooks, bounded in size
//!   and time
//!
//! Error statuses are not failures here: a 404 or 500 is a response like any
//! other and goes through the normal response path.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, Uri, Version};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::TimeoutConfig;
use crate::error::ProxyError;
use crate::resilience::deadline;

/// Why an upstream exchange produced no usable response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFailure {
    /// The request could not be built, or the origin's reply did not parse.
    ProtocolViolation(String),
    /// Connect failure, timeout, or the connection dropped mid-exchange.
    Unavailable(String),
    /// The response body exceeded the configured limit.
    ResponseTooLarge { limit: u64 },
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamFailure::ProtocolViolation(reason) => write!(f, "protocol violation: {reason}"),
            UpstreamFailure::Unavailable(reason) => write!(f, "upstream unavailable: {reason}"),
            UpstreamFailure::ResponseTooLarge { limit } => {
                write!(f, "response body exceeds {limit} bytes")
            }
        }
    }
}

impl StdError for UpstreamFailure {}

/// The outbound half of a transaction, as the request hooks left it.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Shared HTTP/HTTPS client used by every pipeline.
#[derive(Clone)]
pub struct Upstream {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Duration,
}

impl Upstream {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        if !timeouts.connect().is_zero() {
            http.set_connect_timeout(Some(timeouts.connect()));
        }

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(https);

        Self {
            client,
            request_timeout: timeouts.request(),
        }
    }

    /// Send `outbound` and wait for the response head.
    pub async fn forward(&self, outbound: OutboundRequest) -> Result<Response<Incoming>, UpstreamFailure> {
        let request = build_request(outbound)?;
        let uri = request.uri().clone();

        let exchange = self.client.request(request);
        let result = if self.request_timeout.is_zero() {
            exchange.await
        } else {
            tokio::time::timeout(self.request_timeout, exchange)
                .await
                .map_err(|_| UpstreamFailure::Unavailable(format!("no response from {uri} within {:?}", self.request_timeout)))?
        };

        result.map_err(|e| classify_client_error(&e))
    }

    /// Read the entire response body, at most `limit` bytes.
    ///
    /// Shares the request timeout, counted again from the first body read.
    pub async fn read_body(&self, body: Incoming, limit: u64) -> Result<Bytes, UpstreamFailure> {
        let limited = Limited::new(body, usize::try_from(limit).unwrap_or(usize::MAX));
        let collect = async { Ok::<_, ProxyError>(limited.collect().await) };
        let collected = deadline("upstream body", self.request_timeout, collect)
            .await
            .map_err(|e| match e {
                ProxyError::Timeout(_) => UpstreamFailure::Unavailable(format!(
                    "response body not received within {:?}",
                    self.request_timeout
                )),
                other => UpstreamFailure::Unavailable(other.to_string()),
            })?;

        collected
            .map(|collected| collected.to_bytes())
            .map_err(|e| classify_body_error(&*e, limit))
    }
}

fn build_request(outbound: OutboundRequest) -> Result<Request<Full<Bytes>>, UpstreamFailure> {
    let version = match outbound.version {
        Version::HTTP_10 => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut builder = Request::builder()
        .method(outbound.method)
        .uri(outbound.uri)
        .version(version);
    if let Some(headers) = builder.headers_mut() {
        *headers = outbound.headers;
    }

    builder
        .body(Full::new(outbound.body.unwrap_or_default()))
        .map_err(|e| UpstreamFailure::ProtocolViolation(format!("invalid request: {e}")))
}


fn classify_client_error(err: &hyper_util::client::legacy::Error) -> UpstreamFailure {
    if err.is_connect() {
        return UpstreamFailure::Unavailable(error_chain(err));
    }
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            return classify_hyper_error(hyper_err);
        }
        source = cause.source();
    }
    UpstreamFailure::Unavailable(error_chain(err))
}

fn classify_body_error(err: &(dyn StdError + Send + Sync + 'static), limit: u64) -> UpstreamFailure {
    if err.is::<LengthLimitError>() {
        return UpstreamFailure::ResponseTooLarge { limit };
    }
    match err.downcast_ref::<hyper::Error>() {
        Some(hyper_err) => classify_hyper_error(hyper_err),
        None => UpstreamFailure::Unavailable(error_chain(err)),
    }
}

fn classify_hyper_error(err: &hyper::Error) -> UpstreamFailure {
    if err.is_parse() || err.is_parse_status() || err.is_parse_too_large() {
        UpstreamFailure::ProtocolViolation(error_chain(err))
    } else {
        UpstreamFailure::Unavailable(error_chain(err))
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

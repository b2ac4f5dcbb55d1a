//! Per-connection transaction pipeline.
//!
//! # Data Flow
//! ```text
//! accepted socket
//!     → framing.rs read head (CONNECT: 200 + TLS, read inner head)
//!     → read body, decode br
//!     → request hooks ──cancel──▶ close, nothing sent upstream
//!     → re-encode, fix Content-Length, strip hop-by-hop
//!     → upstream.rs forward ──failure──▶ close
//!     → read body (bounded), decode br
//!     → response hooks ──cancel──▶ close, nothing sent to client
//!     → re-encode, reply with Content-Length + Connection: close
//!       (HEAD, 1xx, 204, 304: origin headers, no body)
//! ```
//!
//! # Design Decisions
//! - Early exits close the socket without writing anything to the client
//! - Bodies are owned by the record being dispatched; dropping the record
//!   releases them on every path
//! - Each task runs under `catch_unwind`; a panicking hook takes down one
//!   transaction, never the accept loop

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Method, StatusCode};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::{ProxyError, Result};
use crate::http::encoding::{content_encoding, decode, maybe_reencode};
use crate::http::framing::{
    response_has_body, strip_hop_by_hop, ClientConnection, ClientStream, FramingLimits, RequestHead,
};
use crate::http::upstream::{OutboundRequest, Upstream, UpstreamFailure};
use crate::intercept::{Dispatch, EventBus, InterceptedRequest, InterceptedResponse, Payload};
use crate::net::connection::{ConnectionId, ConnectionTracker};
use crate::net::tls::CertificateSource;
use crate::observability::metrics;
use crate::resilience::deadline;

/// How a transaction ended, when it ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// The response was written to the client.
    Completed { status: StatusCode },
    /// Nothing parseable arrived from the client.
    Malformed,
    /// A request hook cancelled; nothing was forwarded.
    RequestCancelled,
    /// A response hook cancelled; nothing was written to the client.
    ResponseCancelled,
    /// The origin could not be reached or dropped the exchange.
    UpstreamUnavailable,
    /// The request could not be built or the origin's reply did not parse.
    ProtocolViolation,
    /// A request the proxy cannot carry (tunnel without a certificate, chunked upload).
    Unsupported,
    /// The origin's response body exceeded the configured limit.
    ResponseTooLarge,
}

impl TransactionOutcome {
    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            TransactionOutcome::Completed { .. } => "completed",
            TransactionOutcome::Malformed => "malformed",
            TransactionOutcome::RequestCancelled => "request_cancelled",
            TransactionOutcome::ResponseCancelled => "response_cancelled",
            TransactionOutcome::UpstreamUnavailable => "upstream_unavailable",
            TransactionOutcome::ProtocolViolation => "protocol_violation",
            TransactionOutcome::Unsupported => "unsupported",
            TransactionOutcome::ResponseTooLarge => "response_too_large",
        }
    }
}

impl From<UpstreamFailure> for TransactionOutcome {
    fn from(failure: UpstreamFailure) -> Self {
        match failure {
            UpstreamFailure::ProtocolViolation(_) => TransactionOutcome::ProtocolViolation,
            UpstreamFailure::Unavailable(_) => TransactionOutcome::UpstreamUnavailable,
            UpstreamFailure::ResponseTooLarge { .. } => TransactionOutcome::ResponseTooLarge,
        }
    }
}

/// Everything a transaction needs, shared by all connection tasks.
#[derive(Clone)]
pub struct Pipeline {
    bus: Arc<EventBus>,
    upstream: Upstream,
    certificates: Option<Arc<dyn CertificateSource>>,
    limits: FramingLimits,
    client_read_timeout: Duration,
    tracker: ConnectionTracker,
}

impl Pipeline {
    pub fn new(
        bus: Arc<EventBus>,
        upstream: Upstream,
        certificates: Option<Arc<dyn CertificateSource>>,
        limits: FramingLimits,
        client_read_timeout: Duration,
        tracker: ConnectionTracker,
    ) -> Self {
        Self {
            bus,
            upstream,
            certificates,
            limits,
            client_read_timeout,
            tracker,
        }
    }

    /// Run one transaction on its own task.
    ///
    /// Errors and panics are logged and counted here; nothing propagates to
    /// the caller, which never awaits the handle during normal operation.
    pub fn spawn<S>(&self, stream: S, peer: SocketAddr) -> JoinHandle<()>
    where
        S: ClientStream + 'static,
    {
        let pipeline = self.clone();
        let id = ConnectionId::new();
        let guard = self.tracker.track(id);
        let span = tracing::info_span!("transaction", connection_id = %id, peer = %peer);

        tokio::spawn(
            async move {
                let _guard = guard;
                let start = Instant::now();
                let result = AssertUnwindSafe(pipeline.handle(id, stream, peer))
                    .catch_unwind()
                    .await;

                match result {
                    Ok(Ok(outcome)) => {
                        tracing::debug!(
                            outcome = outcome.label(),
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Transaction finished"
                        );
                        metrics::record_transaction(outcome.label(), start);
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Transaction aborted");
                        metrics::record_transaction("error", start);
                    }
                    Err(panic) => {
                        tracing::error!(panic = %panic_message(&*panic), "Transaction panicked");
                        metrics::record_transaction("panic", start);
                    }
                }
            }
            .instrument(span),
        )
    }

    /// Drive one transaction to completion or early termination.
    pub async fn handle<S>(&self, id: ConnectionId, stream: S, peer: SocketAddr) -> Result<TransactionOutcome>
    where
        S: ClientStream + 'static,
    {
        let conn = ClientConnection::new(stream, peer, self.limits);
        let (mut conn, head) = match self.read_head(conn).await? {
            Ok(pair) => pair,
            Err(outcome) => return Ok(outcome),
        };

        let Some(uri) = conn.resolve_uri(&head) else {
            tracing::debug!(target_uri = %head.target, "Request target cannot be resolved");
            return Ok(TransactionOutcome::Malformed);
        };
        if head.headers.contains_key(TRANSFER_ENCODING) {
            tracing::debug!("Chunked request bodies are not supported");
            return Ok(TransactionOutcome::Unsupported);
        }

        let body = match (head.headers.get(CONTENT_LENGTH), head.content_length()) {
            (Some(_), None) => {
                tracing::debug!("Invalid Content-Length");
                return Ok(TransactionOutcome::Malformed);
            }
            (_, Some(len)) if len > 0 => {
                let raw = conn.read_body(len).await?;
                Payload::non_empty(decode(raw, content_encoding(&head.headers))?)
            }
            _ => None,
        };

        let RequestHead {
            method,
            version,
            headers,
            ..
        } = head;
        let mut request = InterceptedRequest::new(id, conn.peer(), method, uri, version, headers);
        if let Some(body) = body {
            request.set_body(body);
        }

        let request = match self.bus.dispatch_request(request).await {
            Ok(Dispatch::Proceed(request)) => request,
            Ok(Dispatch::Cancelled(_)) => {
                tracing::debug!("Request cancelled by hook");
                return Ok(TransactionOutcome::RequestCancelled);
            }
            Err(e) => {
                metrics::record_hook_failure("request");
                return Err(e.into());
            }
        };

        let request_method = request.method.clone();
        let request_uri = request.uri.clone();
        let outbound = outbound_request(request)?;
        tracing::debug!(method = %outbound.method, uri = %outbound.uri, "Forwarding request");

        let response = match self.upstream.forward(outbound).await {
            Ok(response) => response,
            Err(failure) => {
                tracing::debug!(reason = %failure, "Upstream exchange failed");
                return Ok(failure.into());
            }
        };

        let (parts, incoming) = response.into_parts();
        let raw = match self
            .upstream
            .read_body(incoming, self.limits.max_response_body_bytes)
            .await
        {
            Ok(raw) => raw,
            Err(failure) => {
                tracing::debug!(reason = %failure, "Reading upstream body failed");
                return Ok(failure.into());
            }
        };
        let body = decode(raw, content_encoding(&parts.headers))?;

        let mut response = InterceptedResponse::new(
            id,
            request_method,
            request_uri,
            parts.status,
            parts.version,
            parts.headers,
        );
        if let Some(body) = Payload::non_empty(body) {
            response.set_body(body);
        }

        let mut response = match self.bus.dispatch_response(response).await {
            Ok(Dispatch::Proceed(response)) => response,
            Ok(Dispatch::Cancelled(_)) => {
                tracing::debug!("Response cancelled by hook");
                return Ok(TransactionOutcome::ResponseCancelled);
            }
            Err(e) => {
                metrics::record_hook_failure("response");
                return Err(e.into());
            }
        };

        let body = if response_has_body(response.request_method(), response.status) {
            encode_body(response.take_body(), content_encoding(&response.headers))?
        } else {
            None
        };
        conn.send_response(response.request_method(), response.status, &response.headers, body.as_ref())
            .await?;

        Ok(TransactionOutcome::Completed {
            status: response.status,
        })
    }

    /// Read the request head, terminating TLS first for `CONNECT`.
    ///
    /// The inner `Err` carries an outcome that ends the transaction early.
    async fn read_head(
        &self,
        mut conn: ClientConnection,
    ) -> Result<std::result::Result<(ClientConnection, RequestHead), TransactionOutcome>> {
        let Some(head) = self.read_with_deadline(&mut conn).await? else {
            return Ok(Err(TransactionOutcome::Malformed));
        };
        if head.method != Method::CONNECT {
            return Ok(Ok((conn, head)));
        }

        let Some(certificates) = &self.certificates else {
            tracing::debug!(authority = %head.target, "CONNECT refused: no certificate source");
            return Ok(Err(TransactionOutcome::Unsupported));
        };
        let mut conn = conn.upgrade_tls(certificates.as_ref(), &head.target).await?;

        match self.read_with_deadline(&mut conn).await? {
            Some(inner) if inner.method == Method::CONNECT => Ok(Err(TransactionOutcome::Unsupported)),
            Some(inner) => Ok(Ok((conn, inner))),
            None => Ok(Err(TransactionOutcome::Malformed)),
        }
    }

    async fn read_with_deadline(&self, conn: &mut ClientConnection) -> Result<Option<RequestHead>> {
        match deadline("client read", self.client_read_timeout, conn.read_request()).await {
            Err(ProxyError::Timeout(_)) => {
                tracing::debug!("Client sent no request in time");
                Ok(None)
            }
            other => other,
        }
    }
}

/// Turn a dispatched request into what goes on the wire.
fn outbound_request(mut request: InterceptedRequest) -> Result<OutboundRequest> {
    let body = encode_body(request.take_body(), content_encoding(&request.headers))?;

    let mut headers = std::mem::take(&mut request.headers);
    strip_hop_by_hop(&mut headers);
    match &body {
        Some(bytes) => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        }
        None => {
            headers.remove(CONTENT_LENGTH);
        }
    }

    Ok(OutboundRequest {
        method: request.method.clone(),
        uri: request.uri.clone(),
        version: request.version,
        headers,
        body,
    })
}

/// Re-encode a body for the wire, releasing the payload.
fn encode_body(payload: Option<Payload>, encoding: Option<&str>) -> Result<Option<Bytes>> {
    match payload {
        Some(payload) => Ok(Some(maybe_reencode(payload.bytes().clone(), encoding)?)),
        None => Ok(None),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

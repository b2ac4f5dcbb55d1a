//! Records threaded through the request and response hooks.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{HeaderMap, HOST};
use http::{Method, StatusCode, Uri, Version};

use crate::net::connection::ConnectionId;

type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

/// An owned message body.
///
/// Exactly one owner holds a payload at any time. Replacing the body of a
/// record drops the previous payload, which runs its release callback (if
/// any) exactly once.
pub struct Payload {
    bytes: Bytes,
    on_release: Option<ReleaseFn>,
}

impl Payload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            on_release: None,
        }
    }

    /// Attach a callback that runs when this payload is released.
    pub fn with_release<F>(bytes: impl Into<Bytes>, on_release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            bytes: bytes.into(),
            on_release: Some(Box::new(on_release)),
        }
    }

    /// Wrap `bytes` only when non-empty.
    pub fn non_empty(bytes: Bytes) -> Option<Self> {
        (!bytes.is_empty()).then(|| Self::new(bytes))
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

}

impl Drop for Payload {
    fn drop(&mut self) {
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("len", &self.bytes.len())
            .field("tracked", &self.on_release.is_some())
            .finish()
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&'static str> for Payload {
    fn from(text: &'static str) -> Self {
        Self::new(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// What a hook decided about the record it was handed.
///
/// `Cancel` still returns the record so that later hooks can observe it; once
/// any hook cancels, the transaction stays cancelled.
#[derive(Debug)]
pub enum Verdict<T> {
    Continue(T),
    Cancel(T),
}

impl<T> Verdict<T> {
    pub fn is_cancel(&self) -> bool {
        matches!(self, Verdict::Cancel(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Verdict::Continue(inner) | Verdict::Cancel(inner) => inner,
        }
    }
}

/// An outbound request captured from a client, before it is forwarded.
#[derive(Debug)]
pub struct InterceptedRequest {
    id: ConnectionId,
    peer: SocketAddr,
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    body: Option<Payload>,
    cancelled: bool,
}

impl InterceptedRequest {
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        method: Method,
        uri: Uri,
        version: Version,
        headers: HeaderMap,
    ) -> Self {
        Self {
            id,
            peer,
            method,
            uri,
            version,
            headers,
            body: None,
            cancelled: false,
        }
    }

    /// Transaction this request belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Address of the client that sent the request.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Host the request is addressed to: the `Host` header, else the URI authority.
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| self.uri.authority().map(|authority| authority.as_str()))
    }

    pub fn body(&self) -> Option<&Payload> {
        self.body.as_ref()
    }

    /// Replace the body, releasing the previous one.
    pub fn set_body(&mut self, body: impl Into<Payload>) {
        self.body = Some(body.into());
    }

    /// Take ownership of the body, leaving none.
    pub fn take_body(&mut self) -> Option<Payload> {
        self.body.take()
    }

    /// Drop the body; the request is forwarded without one.
    pub fn clear_body(&mut self) {
        self.body = None;
    }

    /// True once any hook in the current dispatch has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }
}

/// A response captured from upstream, before it is replayed to the client.
#[derive(Debug)]
pub struct InterceptedResponse {
    id: ConnectionId,
    request_method: Method,
    request_uri: Uri,
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    body: Option<Payload>,
    cancelled: bool,
}

impl InterceptedResponse {
    pub fn new(
        id: ConnectionId,
        request_method: Method,
        request_uri: Uri,
        status: StatusCode,
        version: Version,
        headers: HeaderMap,
    ) -> Self {
        Self {
            id,
            request_method,
            request_uri,
            status,
            version,
            headers,
            body: None,
            cancelled: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Method of the request that produced this response.
    pub fn request_method(&self) -> &Method {
        &self.request_method
    }

    /// Target of the request that produced this response.
    pub fn request_uri(&self) -> &Uri {
        &self.request_uri
    }

    pub fn body(&self) -> Option<&Payload> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: impl Into<Payload>) {
        self.body = Some(body.into());
    }

    pub fn take_body(&mut self) -> Option<Payload> {
        self.body.take()
    }

    pub fn clear_body(&mut self) {
        self.body = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }
}

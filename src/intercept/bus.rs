//! Hook registration and sequential dispatch.
//!
//! # Contract
//! - Hooks for one phase run in registration order, one at a time; each is
//!   awaited before the next starts.
//! - A hook error stops the dispatch and is returned to the pipeline.
//! - A `Cancel` does not stop the dispatch. Later hooks still see the record
//!   (with `is_cancelled()` set) and cannot revert the cancellation.
//!
//! Subscriber lists are copy-on-write: every dispatch works on the snapshot
//! taken when it began, so registering or removing a hook never disturbs a
//! transaction that is already running.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use crate::error::HookError;
use crate::intercept::event::{InterceptedRequest, InterceptedResponse, Verdict};

/// Result a hook hands back to the dispatcher.
pub type HookResult<T> = Result<Verdict<T>, HookError>;

/// Observes or rewrites requests before they are forwarded upstream.
#[async_trait]
pub trait RequestHook: Send + Sync {
    async fn on_request(&self, request: InterceptedRequest) -> HookResult<InterceptedRequest>;
}

/// Observes or rewrites responses before they are replayed to the client.
#[async_trait]
pub trait ResponseHook: Send + Sync {
    async fn on_response(&self, response: InterceptedResponse) -> HookResult<InterceptedResponse>;
}

/// Handle identifying one registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

struct Registration<H: ?Sized> {
    id: HookId,
    hook: Arc<H>,
}

impl<H: ?Sized> Clone for Registration<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            hook: Arc::clone(&self.hook),
        }
    }
}

type Registrations<H> = ArcSwap<Vec<Registration<H>>>;

/// The two hook points of the interception engine.
pub struct EventBus {
    next_id: AtomicU64,
    request_hooks: Registrations<dyn RequestHook>,
    response_hooks: Registrations<dyn ResponseHook>,
}

/// Outcome of dispatching one phase.
#[derive(Debug)]
pub enum Dispatch<T> {
    Proceed(T),
    Cancelled(T),
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            request_hooks: ArcSwap::from_pointee(Vec::new()),
            response_hooks: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn allocate_id(&self) -> HookId {
        HookId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a request hook; it runs after every hook registered before it.
    pub fn on_request(&self, hook: impl RequestHook + 'static) -> HookId {
        self.on_request_arc(Arc::new(hook))
    }

    pub fn on_request_arc(&self, hook: Arc<dyn RequestHook>) -> HookId {
        let id = self.allocate_id();
        self.request_hooks.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Registration {
                id,
                hook: Arc::clone(&hook),
            });
            next
        });
        tracing::debug!(hook_id = id.0, "Request hook registered");
        id
    }

    /// Register a response hook; it runs after every hook registered before it.
    pub fn on_response(&self, hook: impl ResponseHook + 'static) -> HookId {
        self.on_response_arc(Arc::new(hook))
    }

    pub fn on_response_arc(&self, hook: Arc<dyn ResponseHook>) -> HookId {
        let id = self.allocate_id();
        self.response_hooks.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Registration {
                id,
                hook: Arc::clone(&hook),
            });
            next
        });
        tracing::debug!(hook_id = id.0, "Response hook registered");
        id
    }

    /// Remove a registration from whichever phase holds it.
    ///
    /// Returns false if the id was unknown (or already removed).
    pub fn remove(&self, id: HookId) -> bool {
        let removed = remove_from(&self.request_hooks, id) || remove_from(&self.response_hooks, id);
        if removed {
            tracing::debug!(hook_id = id.0, "Hook removed");
        }
        removed
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.request_hooks.store(Arc::new(Vec::new()));
        self.response_hooks.store(Arc::new(Vec::new()));
    }

    pub fn request_hook_count(&self) -> usize {
        self.request_hooks.load().len()
    }

    pub fn response_hook_count(&self) -> usize {
        self.response_hooks.load().len()
    }

    /// Run every request hook over `request`.
    pub async fn dispatch_request(
        &self,
        mut request: InterceptedRequest,
    ) -> Result<Dispatch<InterceptedRequest>, HookError> {
        let hooks = self.request_hooks.load_full();
        for registration in hooks.iter() {
            request = match registration.hook.on_request(request).await? {
                Verdict::Continue(request) => request,
                Verdict::Cancel(mut request) => {
                    request.mark_cancelled();
                    request
                }
            };
        }
        Ok(if request.is_cancelled() {
            Dispatch::Cancelled(request)
        } else {
            Dispatch::Proceed(request)
        })
    }

    /// Run every response hook over `response`.
    pub async fn dispatch_response(
        &self,
        mut response: InterceptedResponse,
    ) -> Result<Dispatch<InterceptedResponse>, HookError> {
        let hooks = self.response_hooks.load_full();
        for registration in hooks.iter() {
            response = match registration.hook.on_response(response).await? {
                Verdict::Continue(response) => response,
                Verdict::Cancel(mut response) => {
                    response.mark_cancelled();
                    response
                }
            };
        }
        Ok(if response.is_cancelled() {
            Dispatch::Cancelled(response)
        } else {
            Dispatch::Proceed(response)
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_from<H: ?Sized>(list: &Registrations<H>, id: HookId) -> bool {
    let mut found = false;
    list.rcu(|current| {
        found = current.iter().any(|registration| registration.id == id);
        current
            .iter()
            .filter(|registration| registration.id != id)
            .cloned()
            .collect::<Vec<_>>()
    });
    found
}

/// Adapters turning async closures into hooks.
pub mod hook_fn {
    use super::*;

    /// Request hook backed by a closure.
    pub struct RequestFn<F>(F);

    /// Response hook backed by a closure.
    pub struct ResponseFn<F>(F);

    pub fn request<F, Fut>(f: F) -> RequestFn<F>
    where
        F: Fn(InterceptedRequest) -> Fut + Send + Sync,
        Fut: Future<Output = HookResult<InterceptedRequest>> + Send,
    {
        RequestFn(f)
    }

    pub fn response<F, Fut>(f: F) -> ResponseFn<F>
    where
        F: Fn(InterceptedResponse) -> Fut + Send + Sync,
        Fut: Future<Output = HookResult<InterceptedResponse>> + Send,
    {
        ResponseFn(f)
    }

    #[async_trait]
    impl<F, Fut> RequestHook for RequestFn<F>
    where
        F: Fn(InterceptedRequest) -> Fut + Send + Sync,
        Fut: Future<Output = HookResult<InterceptedRequest>> + Send,
    {
        async fn on_request(&self, request: InterceptedRequest) -> HookResult<InterceptedRequest> {
            (self.0)(request).await
        }
    }

    #[async_trait]
    impl<F, Fut> ResponseHook for ResponseFn<F>
    where
        F: Fn(InterceptedResponse) -> Fut + Send + Sync,
        Fut: Future<Output = HookResult<InterceptedResponse>> + Send,
    {
        async fn on_response(&self, response: InterceptedResponse) -> HookResult<InterceptedResponse> {
            (self.0)(response).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::hook_fn;
    use super::*;
    use crate::net::connection::ConnectionId;
    use http::{HeaderMap, Method, Uri, Version};
    use std::sync::Mutex;
    use std::time::Duration;

    fn request() -> InterceptedRequest {
        InterceptedRequest::new(
            ConnectionId::new(),
            "127.0.0.1:40000".parse().unwrap(),
            Method::POST,
            Uri::from_static("http://example.test/"),
            Version::HTTP_11,
            HeaderMap::new(),
        )
    }

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        name: &'static str,
        delay_ms: u64,
    ) -> impl RequestHook + 'static {
        let log = log.clone();
        hook_fn::request(move |req| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{name}:start"));
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                log.lock().unwrap().push(format!("{name}:end"));
                Ok(Verdict::Continue(req))
            }
        })
    }

    #[tokio::test]
    async fn hooks_run_sequentially_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        // Slower hooks first: any overlap would interleave the log.
        bus.on_request(recorder(&log, "a", 30));
        bus.on_request(recorder(&log, "b", 10));
        bus.on_request(recorder(&log, "c", 0));

        let outcome = bus.dispatch_request(request()).await.unwrap();
        assert!(matches!(outcome, Dispatch::Proceed(_)));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:start", "a:end", "b:start", "b:end", "c:start", "c:end"]
        );
    }

    #[tokio::test]
    async fn cancel_is_sticky_and_later_hooks_still_run() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        bus.on_request(hook_fn::request(|req| async move { Ok(Verdict::Cancel(req)) }));
        let observed = seen.clone();
        bus.on_request(hook_fn::request(move |req| {
            let observed = observed.clone();
            async move {
                observed.lock().unwrap().push(req.is_cancelled());
                Ok(Verdict::Continue(req))
            }
        }));

        let outcome = bus.dispatch_request(request()).await.unwrap();
        assert!(matches!(outcome, Dispatch::Cancelled(_)));
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn hook_error_stops_dispatch() {
        let bus = EventBus::new();
        let ran = Arc::new(Mutex::new(false));

        bus.on_request(hook_fn::request(|_req| async move {
            Err(HookError::msg("boom"))
        }));
        let flag = ran.clone();
        bus.on_request(hook_fn::request(move |req| {
            let flag = flag.clone();
            async move {
                *flag.lock().unwrap() = true;
                Ok(Verdict::Continue(req))
            }
        }));

        let err = bus.dispatch_request(request()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(!*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn removed_hooks_no_longer_run() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = bus.on_request(recorder(&log, "a", 0));
        bus.on_request(recorder(&log, "b", 0));
        assert_eq!(bus.request_hook_count(), 2);

        assert!(bus.remove(first));
        assert!(!bus.remove(first));
        assert_eq!(bus.request_hook_count(), 1);

        bus.dispatch_request(request()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["b:start", "b:end"]);
    }

    #[tokio::test]
    async fn hooks_can_mutate_the_record() {
        let bus = EventBus::new();
        bus.on_request(hook_fn::request(|mut req| async move {
            req.set_body("rewritten");
            req.method = Method::PUT;
            Ok(Verdict::Continue(req))
        }));

        match bus.dispatch_request(request()).await.unwrap() {
            Dispatch::Proceed(req) => {
                assert_eq!(req.method, Method::PUT);
                assert_eq!(req.body().unwrap().bytes().as_ref(), b"rewritten");
            }
            Dispatch::Cancelled(_) => panic!("request should proceed"),
        }
    }

    #[test]
    fn ids_are_unique_across_phases() {
        let bus = EventBus::new();
        let a = bus.on_request(hook_fn::request(|req| async move { Ok(Verdict::Continue(req)) }));
        let b = bus.on_response(hook_fn::response(|res| async move { Ok(Verdict::Continue(res)) }));
        assert_ne!(a, b);
        assert_eq!(bus.response_hook_count(), 1);
        assert!(bus.remove(b));
        assert_eq!(bus.response_hook_count(), 0);
        bus.clear();
        assert_eq!(bus.request_hook_count(), 0);
    }
}

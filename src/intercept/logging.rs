//! A passive hook that logs every intercepted request and response.

use async_trait::async_trait;

use crate::intercept::bus::{HookResult, RequestHook, ResponseHook};
use crate::intercept::event::{InterceptedRequest, InterceptedResponse, Verdict};

/// Emits one structured event per message; never mutates or cancels.
///
/// Headers are logged at `debug`, the summary line at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHook;

#[async_trait]
impl RequestHook for LoggingHook {
    async fn on_request(&self, request: InterceptedRequest) -> HookResult<InterceptedRequest> {
        tracing::info!(
            connection_id = %request.id(),
            peer = %request.peer(),
            method = %request.method,
            uri = %request.uri,
            body_len = request.body().map(|b| b.len()).unwrap_or(0),
            "Intercepted request"
        );
        for (name, value) in request.headers.iter() {
            tracing::debug!(connection_id = %request.id(), header = %name, value = ?value, "Request header");
        }
        Ok(Verdict::Continue(request))
    }
}

#[async_trait]
impl ResponseHook for LoggingHook {
    async fn on_response(&self, response: InterceptedResponse) -> HookResult<InterceptedResponse> {
        tracing::info!(
            connection_id = %response.id(),
            method = %response.request_method(),
            uri = %response.request_uri(),
            status = response.status.as_u16(),
            body_len = response.body().map(|b| b.len()).unwrap_or(0),
            "Intercepted response"
        );
        for (name, value) in response.headers.iter() {
            tracing::debug!(connection_id = %response.id(), header = %name, value = ?value, "Response header");
        }
        Ok(Verdict::Continue(response))
    }
}

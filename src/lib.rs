//! HTTP/HTTPS interception proxy library
//!
//! Accepts client connections, forwards each request to its real origin and
//! lets registered hooks inspect, rewrite or cancel both the request and the
//! response on the way through.

pub mod config;
pub mod error;
pub mod http;
pub mod intercept;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod registrar;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use error::{HookError, ProxyError, Result};
pub use crate::http::TransactionOutcome;
pub use intercept::{
    hook_fn, EventBus, HookId, InterceptedRequest, InterceptedResponse, LoggingHook, Payload, RequestHook,
    ResponseHook, Verdict,
};
pub use lifecycle::{ProxyEngine, ProxyEngineBuilder};
pub use registrar::{InterceptorModes, NoopRegistrar, ProxySettings, Registrar};

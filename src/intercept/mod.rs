//! Interception subsystem.
//!
//! # Data Flow
//! ```text
//! pipeline reads request
//!     → event.rs (InterceptedRequest, body as Payload)
//!     → bus.rs (request hooks, in registration order)
//!     → Dispatch::Proceed / Dispatch::Cancelled
//! pipeline receives upstream response
//!     → event.rs (InterceptedResponse)
//!     → bus.rs (response hooks)
//!     → reply to client or drop
//! ```
//!
//! # Design Decisions
//! - Hooks take the record by value and hand it back: no hook can keep it
//! - Cancellation is a `Verdict`, not a flag hooks poke at
//! - Subscriber lists are snapshotted per dispatch (copy-on-write)

pub mod bus;
pub mod event;
pub mod logging;

pub use bus::{hook_fn, Dispatch, EventBus, HookId, HookResult, RequestHook, ResponseHook};
pub use event::{InterceptedRequest, InterceptedResponse, Payload, Verdict};
pub use logging::LoggingHook;

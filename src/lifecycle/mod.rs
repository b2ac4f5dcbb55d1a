//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → observability → engine (idle) → start(port) binds + registers
//!
//! Shutdown (engine.rs + shutdown.rs):
//!     stop() → clear registrar → trigger → loop closes socket → ack → stop returns
//!     binary then drains in-flight transactions (wait_idle)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → binary calls stop()
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then observability, then the listener
//! - Ordered shutdown: stop accept, then drain with a deadline

pub mod engine;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use engine::{ProxyEngine, ProxyEngineBuilder};

//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, backoff on errors, stop barrier)
//!     → connection.rs (transaction id, in-flight tracking)
//!     → hand off to http::pipeline
//!     → tls.rs (only after CONNECT, with a certificate source)
//! ```
//!
//! # Design Decisions
//! - No connection cap: each connection is an independent task
//! - Stop closes the socket; in-flight transactions finish on their own

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
pub use tls::{CertificateSource, PemCertificateSource};

//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (or TLS inside CONNECT)
//!     → framing.rs (parse head, read body, write reply)
//!     → pipeline.rs (hooks, codec, outcome classification)
//!     → encoding.rs (br decode before hooks, re-encode after)
//!     → upstream.rs (hyper client toward the origin)
//!     → framing.rs reply → close
//! ```

pub mod encoding;
pub mod framing;
pub mod pipeline;
pub mod upstream;

pub use framing::{ClientConnection, ClientStream, FramingLimits, RequestHead};
pub use pipeline::{Pipeline, TransactionOutcome};
pub use upstream::{Upstream, UpstreamFailure};

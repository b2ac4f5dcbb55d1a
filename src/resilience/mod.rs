//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Accept loop:
//!     → accept error → backoff.rs (exponential delay with jitter, reset on success)
//!
//! Transaction:
//!     → timeouts.rs (deadline on client read, upstream connect, upstream exchange)
//! ```
//!
//! # Design Decisions
//! - Every external wait has a deadline
//! - No retries: a failed upstream exchange ends the transaction

pub mod backoff;
pub mod timeouts;

pub use backoff::{calculate_backoff, AcceptBackoff};
pub use timeouts::deadline;

//! Error types shared across the interception engine.

use std::net::SocketAddr;
use thiserror::Error;

use crate::http::encoding::CodecError;

/// Result alias used by the engine and the connection pipeline.
pub type Result<T, E = ProxyError> = std::result::Result<T, E>;

/// Boxed error a hook may surface.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that abort a transaction or fail an engine operation.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Socket or stream I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A request or response hook returned an error.
    #[error("hook failed: {0}")]
    Hook(#[from] HookError),

    /// Re-encoding or decoding a payload failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// TLS setup or handshake failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Declared body length exceeds the configured limit.
    #[error("body of {declared} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { declared: u64, limit: u64 },

    /// A bounded operation did not finish in time.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The engine cannot be built from the given configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure reported by a hook subscriber.
///
/// Wraps whatever error the subscriber produced; the pipeline treats every
/// hook error the same way (the transaction is abandoned).
#[derive(Debug, Error)]
#[error("{source}")]
pub struct HookError {
    #[source]
    source: BoxError,
}

impl HookError {
    /// Wrap an arbitrary error.
    pub fn new(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Build a hook error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(message.into())
    }

    /// The underlying subscriber error.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_error_displays_inner_message() {
        let err = ProxyError::from(HookError::msg("subscriber exploded"));
        assert_eq!(err.to_string(), "hook failed: subscriber exploded");
    }

    #[test]
    fn body_limit_message() {
        let err = ProxyError::BodyTooLarge {
            declared: 10,
            limit: 5,
        };
        assert!(err.to_string().contains("10 bytes"));
    }
}

//! TCP listener and accept loop.
//!
//! # Responsibilities
//! - Bind the listening socket
//! - Accept connections and hand each to a supervised pipeline task
//! - Retry accept errors with backoff instead of giving up
//! - Close the socket before acknowledging a stop

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

use crate::http::Pipeline;
use crate::lifecycle::shutdown::{ShutdownSignal, StopAck};
use crate::observability::metrics;
use crate::resilience::AcceptBackoff;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl ListenerError {
    pub fn into_io(self) -> std::io::Error {
        match self {
            ListenerError::Bind(e) | ListenerError::Accept(e) => e,
        }
    }
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

enum LoopEvent {
    Stop(Option<StopAck>),
    Accepted(Result<(TcpStream, SocketAddr), ListenerError>),
}

/// The proxy's listening socket.
///
/// Concurrency is unbounded: every accepted connection gets its own task.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(address = %local_addr, "Listener bound");

        Ok(Self { inner, local_addr })
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(peer_addr = %peer, "Connection accepted");
        Ok((stream, peer))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept until a stop arrives or the trigger is dropped.
    ///
    /// The socket is closed before the stop is acknowledged, so a stopper that
    /// has been released can rely on the port refusing connections.
    pub async fn serve(self, pipeline: Pipeline, mut shutdown: ShutdownSignal) {
        let mut backoff = AcceptBackoff::default();

        loop {
            let event = tokio::select! {
                biased;
                ack = shutdown.recv() => LoopEvent::Stop(ack),
                accepted = self.accept() => LoopEvent::Accepted(accepted),
            };

            match event {
                LoopEvent::Stop(ack) => {
                    self.close(ack);
                    return;
                }
                LoopEvent::Accepted(Ok((stream, peer))) => {
                    backoff.reset();
                    metrics::record_accepted();
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    pipeline.spawn(stream, peer);
                }
                LoopEvent::Accepted(Err(e)) => {
                    metrics::record_accept_error();
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        consecutive_failures = backoff.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Accept failed"
                    );
                    tokio::select! {
                        biased;
                        ack = shutdown.recv() => {
                            self.close(ack);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn close(self, ack: Option<StopAck>) {
        let address = self.local_addr;
        drop(self);
        tracing::info!(address = %address, "Listener closed");
        if let Some(ack) = ack {
            ack.complete();
        }
    }
}

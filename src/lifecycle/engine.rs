//! The interception engine: listener lifecycle and public control surface.
//!
//! # Responsibilities
//! - Start: bind, spawn the accept loop, register the system proxy
//! - Stop: unregister, close the listener, wait for the loop to confirm
//! - Own the event bus and the proxy override list
//!
//! # Design Decisions
//! - Start and stop serialize on one async lock; nothing else takes it
//! - Stop does not wait for in-flight transactions (see [`ProxyEngine::wait_idle`])
//! - Registrar failures are logged and never fail start or stop

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{ProxyConfig, TimeoutConfig};
use crate::error::{ProxyError, Result};
use crate::http::{FramingLimits, Pipeline, Upstream};
use crate::intercept::EventBus;
use crate::lifecycle::shutdown::{self, ShutdownTrigger};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::Listener;
use crate::net::tls::CertificateSource;
use crate::registrar::{InterceptorModes, NoopRegistrar, ProxySettings, Registrar};

/// A running listener and the means to stop it.
struct ListenerHandle {
    local_addr: SocketAddr,
    trigger: ShutdownTrigger,
    task: JoinHandle<()>,
}

/// Guarded by the engine's state lock. `listener.is_some() == running`.
#[derive(Default)]
struct ProxyState {
    running: bool,
    listener: Option<ListenerHandle>,
}

/// An HTTP/HTTPS interception proxy.
///
/// Created idle. [`start`](Self::start) binds a listener and begins accepting;
/// hooks registered on [`events`](Self::events) see every transaction.
pub struct ProxyEngine {
    state: Mutex<ProxyState>,
    running: AtomicBool,
    local_addr: ArcSwapOption<SocketAddr>,
    bind_ip: IpAddr,
    bus: Arc<EventBus>,
    overrides: ArcSwap<Vec<String>>,
    bypass_local: bool,
    registrar: Arc<dyn Registrar>,
    pipeline: Pipeline,
    tracker: ConnectionTracker,
}

impl ProxyEngine {
    pub fn builder() -> ProxyEngineBuilder {
        ProxyEngineBuilder::default()
    }

    /// Build an engine from a loaded configuration.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        crate::lifecycle::startup::engine_from_config(config)
    }

    /// Start intercepting HTTP and HTTPS on `port`.
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        self.start_with_modes(port, InterceptorModes::ALL).await
    }

    /// Start intercepting on `port`, registering the system proxy for `modes`.
    ///
    /// A running engine is stopped first. Port 0 binds an ephemeral port; the
    /// bound address is returned.
    pub async fn start_with_modes(&self, port: u16, modes: InterceptorModes) -> Result<SocketAddr> {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await;

        let addr = SocketAddr::new(self.bind_ip, port);
        let listener = Listener::bind(addr).await.map_err(|e| ProxyError::Bind {
            addr,
            source: e.into_io(),
        })?;
        let local_addr = listener.local_addr();

        let (trigger, signal) = shutdown::channel();
        let task = tokio::spawn(listener.serve(self.pipeline.clone(), signal));

        state.listener = Some(ListenerHandle {
            local_addr,
            trigger,
            task,
        });
        state.running = true;
        self.running.store(true, Ordering::SeqCst);
        self.local_addr.store(Some(Arc::new(local_addr)));

        let settings = ProxySettings {
            address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local_addr.port()),
            modes,
            overrides: self.overrides(),
            bypass_local: self.bypass_local,
        };
        if let Err(e) = self.registrar.set_proxy(&settings) {
            tracing::warn!(error = %e, "Failed to register system proxy");
        }

        tracing::info!(address = %local_addr, modes = %modes, "Interception engine started");
        Ok(local_addr)
    }

    /// Stop accepting connections.
    ///
    /// Returns once the listening socket is closed. Calling it while idle is a
    /// no-op.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await;
    }

    async fn stop_locked(&self, state: &mut ProxyState) {
        if !state.running {
            return;
        }

        if let Err(e) = self.registrar.clear_proxy() {
            tracing::warn!(error = %e, "Failed to clear system proxy");
        }

        state.running = false;
        self.running.store(false, Ordering::SeqCst);
        self.local_addr.store(None);

        if let Some(handle) = state.listener.take() {
            handle.trigger.trigger().await;
            if let Err(e) = handle.task.await {
                tracing::warn!(error = %e, "Accept loop ended abnormally");
            }
            tracing::info!(address = %handle.local_addr, "Interception engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address of the current listener, if running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.load().as_deref().copied()
    }

    /// Hook registration point.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Hosts that bypass the system proxy. Applied on the next start.
    pub fn overrides(&self) -> Vec<String> {
        self.overrides.load().as_ref().clone()
    }

    pub fn set_overrides(&self, overrides: Vec<String>) {
        self.overrides.store(Arc::new(overrides));
    }

    /// Add a bypass entry unless it is already present.
    pub fn add_override(&self, host: impl Into<String>) {
        let host = host.into();
        self.overrides.rcu(|current| {
            let mut next = current.as_ref().clone();
            if !next.contains(&host) {
                next.push(host.clone());
            }
            next
        });
    }

    /// Transactions currently being processed.
    pub fn in_flight(&self) -> u64 {
        self.tracker.in_flight()
    }

    /// Wait for in-flight transactions to finish; true if they did within `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.tracker.wait_idle(timeout).await
    }
}

impl Drop for ProxyEngine {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(handle) = state.listener.take() {
            handle.task.abort();
        }
        if state.running {
            state.running = false;
            if let Err(e) = self.registrar.clear_proxy() {
                tracing::warn!(error = %e, "Failed to clear system proxy on drop");
            }
        }
    }
}

/// Configures a [`ProxyEngine`].
pub struct ProxyEngineBuilder {
    bind_ip: IpAddr,
    bus: Option<Arc<EventBus>>,
    registrar: Arc<dyn Registrar>,
    certificates: Option<Arc<dyn CertificateSource>>,
    timeouts: TimeoutConfig,
    limits: FramingLimits,
    overrides: Vec<String>,
    bypass_local: bool,
}

impl Default for ProxyEngineBuilder {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bus: None,
            registrar: Arc::new(NoopRegistrar),
            certificates: None,
            timeouts: TimeoutConfig::default(),
            limits: FramingLimits::default(),
            overrides: Vec::new(),
            bypass_local: true,
        }
    }
}

impl ProxyEngineBuilder {
    /// Interface to listen on (default: all interfaces).
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Share an existing event bus instead of creating one.
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn registrar(mut self, registrar: impl Registrar + 'static) -> Self {
        self.registrar = Arc::new(registrar);
        self
    }

    pub fn registrar_arc(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrar = registrar;
        self
    }

    /// Enable TLS interception of `CONNECT` tunnels.
    pub fn certificate_source(mut self, source: impl CertificateSource + 'static) -> Self {
        self.certificates = Some(Arc::new(source));
        self
    }

    pub fn certificate_source_arc(mut self, source: Arc<dyn CertificateSource>) -> Self {
        self.certificates = Some(source);
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn limits(mut self, limits: FramingLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn overrides(mut self, overrides: Vec<String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn bypass_local(mut self, bypass: bool) -> Self {
        self.bypass_local = bypass;
        self
    }

    pub fn build(self) -> ProxyEngine {
        let bus = self.bus.unwrap_or_default();
        let tracker = ConnectionTracker::new();
        let pipeline = Pipeline::new(
            Arc::clone(&bus),
            Upstream::new(&self.timeouts),
            self.certificates,
            self.limits,
            self.timeouts.client_read(),
            tracker.clone(),
        );

        ProxyEngine {
            state: Mutex::new(ProxyState::default()),
            running: AtomicBool::new(false),
            local_addr: ArcSwapOption::empty(),
            bind_ip: self.bind_ip,
            bus,
            overrides: ArcSwap::from_pointee(self.overrides),
            bypass_local: self.bypass_local,
            registrar: self.registrar,
            pipeline,
            tracker,
        }
    }
}

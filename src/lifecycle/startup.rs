//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize logging and the optional metrics exporter
//! - Turn a validated configuration into a ready (idle) engine
//!
//! # Design Decisions
//! - Fail fast: an unreadable certificate or unavailable registrar is fatal here
//! - The listener is not bound until the caller starts the engine

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use crate::config::{ProxyConfig, RegistrarKind};
use crate::error::{ProxyError, Result};
use crate::http::FramingLimits;
use crate::lifecycle::engine::ProxyEngine;
use crate::net::tls::PemCertificateSource;
use crate::observability::{logging, metrics};
use crate::registrar::{NoopRegistrar, Registrar};

/// Set up logging and, when enabled, the Prometheus endpoint.
///
/// Must run inside a Tokio runtime when metrics are enabled.
pub fn init_observability(config: &ProxyConfig) {
    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("logging already initialized: {e}");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }
}

/// Build an idle engine from configuration.
pub fn engine_from_config(config: &ProxyConfig) -> Result<ProxyEngine> {
    let bind_ip: IpAddr = config.listener.bind_address.parse().map_err(|_| {
        ProxyError::Config(format!(
            "listener.bind_address '{}' is not an IP address",
            config.listener.bind_address
        ))
    })?;

    let mut builder = ProxyEngine::builder()
        .bind_ip(bind_ip)
        .registrar_arc(registrar_for(config.registrar.kind)?)
        .timeouts(config.timeouts.clone())
        .limits(FramingLimits {
            max_header_bytes: config.limits.max_header_bytes,
            max_body_bytes: config.limits.max_body_bytes,
            max_response_body_bytes: config.limits.max_response_body_bytes,
        })
        .overrides(config.registrar.overrides.clone())
        .bypass_local(config.registrar.bypass_local);

    if let Some(tls) = &config.tls {
        let source = PemCertificateSource::from_pem_files(Path::new(&tls.cert_path), Path::new(&tls.key_path))?;
        tracing::info!(cert_path = %tls.cert_path, "HTTPS interception enabled");
        builder = builder.certificate_source(source);
    } else {
        tracing::info!("No certificate configured; CONNECT tunnels will be refused");
    }

    Ok(builder.build())
}

fn registrar_for(kind: RegistrarKind) -> Result<Arc<dyn Registrar>> {
    match kind {
        RegistrarKind::None => Ok(Arc::new(NoopRegistrar)),
        #[cfg(target_os = "linux")]
        RegistrarKind::Gsettings => Ok(Arc::new(crate::registrar::GsettingsRegistrar)),
        #[cfg(not(target_os = "linux"))]
        RegistrarKind::Gsettings => Err(ProxyError::Config(
            "the gsettings registrar is only available on Linux".to_string(),
        )),
    }
}

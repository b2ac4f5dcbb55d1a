//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → CLI flags applied on top by the binary
//!     → ProxyEngine::from_config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the engine copies what it needs
//! - All fields have defaults so an empty file (or none) is valid
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    LimitsConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, ProxyMode, RegistrarConfig,
    RegistrarKind, TimeoutConfig, TlsConfig,
};
pub use validation::{validate_config, ValidationError};

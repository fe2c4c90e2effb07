//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → CLI overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Validation reports every problem, not just the first

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{read_config, ConfigError};
pub use schema::{
    ListenerConfig, LogFormat, ObservabilityConfig, ServerConfig, TimeoutConfig, TlsConfig,
    UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};

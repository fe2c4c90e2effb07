//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::ServerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid {field} {value:?}: not a socket address")]
    InvalidAddress { field: &'static str, value: String },
    #[error("invalid upstream target {0:?}")]
    InvalidTarget(String),
    #[error("upstream target scheme must be ws or wss, got {0:?}")]
    UnsupportedScheme(String),
    #[error("upstream target {0:?} has no host")]
    MissingHost(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Check every semantic constraint, collecting all failures.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    match Url::parse(&config.upstream.target) {
        Ok(url) => {
            if !matches!(url.scheme(), "ws" | "wss") {
                errors.push(ValidationError::UnsupportedScheme(url.scheme().to_string()));
            }
            if url.host_str().map_or(true, str::is_empty) {
                errors.push(ValidationError::MissingHost(config.upstream.target.clone()));
            }
        }
        Err(_) => errors.push(ValidationError::InvalidTarget(config.upstream.target.clone())),
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero("listener.max_connections"));
    }
    if config.listener.max_header_bytes == 0 {
        errors.push(ValidationError::Zero("listener.max_header_bytes"));
    }
    if config.timeouts.header_read_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.header_read_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

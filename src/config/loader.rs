//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ServerConfig;
use crate::config::validation::ValidationError;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read a TOML file without validating it.
///
/// Callers apply CLI overrides first and validate the result.
pub fn read_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validation::validate_config;
    use std::io::Write;

    fn temp_file(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("ws-proxy-{}-{}.toml", name, std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_valid_file() {
        let path = temp_file("valid", "[upstream]\ntarget = \"ws://127.0.0.1:3002/\"\n");
        let config = read_config(&path).unwrap();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.upstream.target, "ws://127.0.0.1:3002/");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn reports_parse_errors() {
        let path = temp_file("broken", "[listener\n");
        assert!(matches!(read_config(&path), Err(ConfigError::Parse(_))));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn reports_validation_errors() {
        let path = temp_file("invalid", "[upstream]\ntarget = \"http://backend/\"\n");
        let config = read_config(&path).unwrap();
        let err = ConfigError::Validation(validate_config(&config).unwrap_err());
        assert!(err.to_string().contains("scheme"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            read_config(Path::new("/nonexistent/ws-proxy.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}

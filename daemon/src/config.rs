//! Host configuration loading and validation
//!
//! Parses a TOML file into `schema::HostConfig`, applies serde defaults, and
//! validates strictly with field-path error messages before anything binds.

use crate::{HostError, Result};
use schema::HostConfig;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Load host configuration from a TOML file path
pub fn load_from_toml_path(path: impl AsRef<Path>) -> Result<HostConfig> {
    let data = fs::read_to_string(&path).map_err(|e| {
        HostError::Config(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_from_toml_str(&data)
}

/// Load host configuration from a TOML string
pub fn load_from_toml_str(input: &str) -> Result<HostConfig> {
    let config: HostConfig = toml::from_str(input)
        .map_err(|e| HostError::Config(format!("TOML parse error: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

/// Validate a configuration, returning field-path errors
pub fn validate(config: &HostConfig) -> Result<()> {
    if config.host.trim().is_empty() {
        return Err(HostError::Config("host: cannot be empty".to_string()));
    }
    if config.port == 0 {
        return Err(HostError::Config("port: must be 1..=65535".to_string()));
    }
    validate_root("checkRoot", &config.check_root)?;
    validate_root("sensorRoot", &config.sensor_root)?;
    if config.check_root.trim_end_matches('/') == config.sensor_root.trim_end_matches('/') {
        return Err(HostError::Config(
            "sensorRoot: must differ from checkRoot".to_string(),
        ));
    }
    if let Some(base) = &config.public_base {
        if base.trim().is_empty() {
            return Err(HostError::Config("publicBase: cannot be empty".to_string()));
        }
    }

    let mut seen = HashSet::new();
    for (i, target) in config.targets.iter().enumerate() {
        if target.environment.trim().is_empty() {
            return Err(HostError::Config(format!(
                "targets[{}].environment: cannot be empty",
                i
            )));
        }
        if target.application.trim().is_empty() {
            return Err(HostError::Config(format!(
                "targets[{}].application: cannot be empty",
                i
            )));
        }
        let uri: std::result::Result<hyper::Uri, _> = target.base_address.parse();
        let absolute = uri
            .map(|u| u.scheme().is_some() && u.authority().is_some())
            .unwrap_or(false);
        if !absolute {
            return Err(HostError::Config(format!(
                "targets[{}].baseAddress: must be an absolute URI, got '{}'",
                i, target.base_address
            )));
        }
        let key = (
            target.environment.to_ascii_lowercase(),
            target.application.to_ascii_lowercase(),
        );
        if !seen.insert(key) {
            return Err(HostError::Config(format!(
                "targets[{}]: duplicate target '{}/{}'",
                i, target.environment, target.application
            )));
        }
    }
    Ok(())
}

fn validate_root(field: &str, root: &str) -> Result<()> {
    if !root.starts_with('/') || root.trim_end_matches('/').is_empty() {
        return Err(HostError::Config(format!(
            "{}: must be a non-root path starting with '/'",
            field
        )));
    }
    Ok(())
}

/// The externally visible base URL for listing URLs; falls back to the bind
/// address when none is configured
pub fn effective_public_base(config: &HostConfig) -> String {
    match &config.public_base {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => format!("http://{}:{}", config.host, config.port),
    }
}

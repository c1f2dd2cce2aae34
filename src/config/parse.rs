use super::types::AppenderConfig;
use super::{expand_env_vars, unexpanded_env_vars};
use crate::index::validate_date_pattern;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<AppenderConfig, ConfigError> {
    let yaml = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml)
}

/// Parse and validate a YAML config document.
///
/// `$env{VAR}` references are expanded before parsing; any left unexpanded
/// are reported as an error rather than passed through as literal text.
pub fn parse_config(yaml: &str) -> Result<AppenderConfig, ConfigError> {
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    // An empty document means "all defaults"
    let config: AppenderConfig = if yaml.trim().is_empty() {
        AppenderConfig::default()
    } else {
        serde_yaml::from_str(&yaml)?
    };

    validate_config(&config)?;
    Ok(config)
}

fn check_unexpanded_vars(yaml: &str) -> Result<(), ConfigError> {
    let names = unexpanded_env_vars(yaml);
    if names.is_empty() {
        return Ok(());
    }

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}",
        names.join(", ")
    )))
}

pub fn validate_config(config: &AppenderConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.urls.is_empty() {
        errors.push("urls must contain at least one backend URL".to_string());
    }
    for (i, url) in config.urls.iter().enumerate() {
        match reqwest::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => errors.push(format!(
                "urls[{}]: unsupported scheme '{}' in '{}'",
                i,
                parsed.scheme(),
                url
            )),
            Err(e) => errors.push(format!("urls[{}]: invalid URL '{}': {}", i, url, e)),
        }
    }

    if config.index.trim().is_empty() {
        errors.push("index prefix cannot be empty".to_string());
    }

    if let Err(e) = validate_date_pattern(&config.date_pattern) {
        errors.push(e.to_string());
    }

    if config.flush_interval.is_zero() {
        errors.push("flush_interval must be greater than zero".to_string());
    }

    if config.batch_size == 0 {
        errors.push("batch_size must be greater than zero".to_string());
    }

    if config.max_buffered < config.batch_size {
        errors.push(format!(
            "max_buffered ({}) must be at least batch_size ({})",
            config.max_buffered, config.batch_size
        ));
    }

    if config.password.is_some() && config.username.is_none() {
        errors.push("password is set but username is missing".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

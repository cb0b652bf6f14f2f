//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Secrets that may come from the environment instead of the file.
const ENV_JWT_SECRET: &str = "GATEWAY_JWT_SECRET";
const ENV_MASTER_KEY: &str = "GATEWAY_AGENT_SECRET_MASTER_KEY";
const ENV_REDIS_URL: &str = "GATEWAY_REDIS_URL";
const ENV_ADMIN_KEY: &str = "GATEWAY_ADMIN_API_KEY";

/// Load, complete and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    load_config_str(&content)
}

/// Parse configuration from TOML text, apply env overrides, then validate.
pub fn load_config_str(content: &str) -> Result<GatewayConfig, ConfigError> {
    let mut config: GatewayConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    finalize(&mut config);

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Fill sections whose empty value means "use the reference deployment".
pub fn finalize(config: &mut GatewayConfig) {
    if config.upstreams.is_empty() {
        config.upstreams = GatewayConfig::default_upstreams();
    }
}

fn apply_env_overrides(config: &mut GatewayConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(secret) = lookup(ENV_JWT_SECRET) {
        config.auth.jwt_secret = secret;
    }
    if let Some(master) = lookup(ENV_MASTER_KEY) {
        config.auth.agent_secret_master_key = Some(master);
    }
    if let Some(url) = lookup(ENV_REDIS_URL) {
        config.store.redis_url = url;
    }
    if let Some(key) = lookup(ENV_ADMIN_KEY) {
        config.admin.api_key = key;
    }
}

//! Environment-driven server configuration, read once at startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::InvalidValue("APP_ENV", other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on
    pub port: u16,
    /// Path to the sled database
    pub storage_path: String,
    /// HS256 signing secret shared with the auth service
    pub token_secret: String,
    /// Deployment mode
    pub environment: Environment,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue("PORT", raw))?,
            Err(_) => 5000,
        };

        let storage_path =
            std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./data/syncpad.sled".to_string());

        let token_secret =
            std::env::var("TOKEN_SECRET").map_err(|_| ConfigError::MissingVar("TOKEN_SECRET"))?;

        let environment = match std::env::var("APP_ENV") {
            Ok(raw) => Environment::parse(&raw)?,
            Err(_) => Environment::Development,
        };

        Ok(Self {
            port,
            storage_path,
            token_secret,
            environment,
        })
    }
}

use secrecy::{ExposeSecret, SecretBox};
use std::env;
use thiserror::Error;

/// Environment variable holding the API credential.
pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

/// Model used for the one-shot generation endpoint (file transcription
/// and conversation summaries).
pub const DEFAULT_GENERATE_MODEL: &str = "gemini-2.5-flash";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key format: {reason}")]
    InvalidKeyFormat { reason: String },
}

/// API credential configuration.
#[derive(Debug)]
pub struct ApiConfig {
    api_key: SecretBox<String>,
}

impl ApiConfig {
    /// Load the API configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let api_key = Self::load_api_key(API_KEY_VAR)?;
        Ok(Self { api_key })
    }

    fn load_api_key(env_var: &str) -> Result<SecretBox<String>, ConfigError> {
        let key = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;

        Self::validate_key_format(&key)?;

        Ok(SecretBox::new(Box::new(key)))
    }

    fn validate_key_format(key: &str) -> Result<(), ConfigError> {
        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                reason: "API key cannot be empty".to_string(),
            });
        }
        if key.len() < 10 {
            return Err(ConfigError::InvalidKeyFormat {
                reason: "API key is implausibly short".to_string(),
            });
        }
        Ok(())
    }

    /// Get the API key (use only when making API calls).
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Load configuration with helpful error messages for development.
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded API configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        assert!(ApiConfig::validate_key_format("AIzaSyTestKey12345").is_ok());
        assert!(ApiConfig::validate_key_format("").is_err());
        assert!(ApiConfig::validate_key_format("   ").is_err());
        assert!(ApiConfig::validate_key_format("short").is_err());
    }

    #[test]
    fn test_missing_env_var_is_fatal() {
        // A variable nothing sets: absence must surface as MissingEnvVar.
        let err = ApiConfig::load_api_key("VOICE_LIVE_RS_NO_SUCH_KEY").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }
}

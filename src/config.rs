use std::env;

use url::Url;

use crate::error::ConfigError;
use crate::openai_client::{DEFAULT_BASE_URL, DEFAULT_MODEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Error responses carry diagnostic details.
    Development,
    Production,
}

/// Settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub google_maps_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    /// Deployed chat endpoint to use instead of calling OpenAI in-process.
    pub chat_endpoint_url: Option<Url>,
    pub environment: Environment,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let chat_endpoint_url = match var("CHAT_ENDPOINT_URL") {
            Some(raw) => Some(Url::parse(&raw).map_err(|_| ConfigError::InvalidValue {
                name: "CHAT_ENDPOINT_URL",
                value: raw.clone(),
            })?),
            None => None,
        };

        let environment = match var("APP_ENV").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("production") | Some("prod") | Some("test") => Environment::Production,
            Some("development") | Some("dev") => Environment::Development,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "APP_ENV",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            openai_api_key: var("OPENAI_API_KEY"),
            google_maps_api_key: var("GOOGLE_MAPS_API_KEY"),
            openai_model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            openai_base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            chat_endpoint_url,
            environment,
        })
    }
}

/// First characters of a credential, for logs.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(8).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert!(config.openai_api_key.is_none());
        assert!(config.google_maps_api_key.is_none());
        assert_eq!(config.openai_model, DEFAULT_MODEL);
        assert_eq!(config.openai_base_url, DEFAULT_BASE_URL);
        assert_eq!(config.environment, Environment::Production);
    }

    #[test]
    fn test_blank_credentials_count_as_missing() {
        let config = config(&[("OPENAI_API_KEY", "  "), ("GOOGLE_MAPS_API_KEY", "maps")]).unwrap();
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.google_maps_api_key.as_deref(), Some("maps"));
    }

    #[test]
    fn test_environment_and_endpoint() {
        let config = config(&[
            ("APP_ENV", "Development"),
            ("CHAT_ENDPOINT_URL", "http://localhost:3000/api/openai/chat"),
        ])
        .unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.chat_endpoint_url.unwrap().path(), "/api/openai/chat");

        assert!(config_err("APP_ENV", "staging"));
        assert!(config_err("CHAT_ENDPOINT_URL", "not a url"));
    }

    fn config_err(name: &str, value: &str) -> bool {
        matches!(config(&[(name, value)]), Err(ConfigError::InvalidValue { .. }))
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("sk-abcdefghijkl"), "sk-abcde...");
    }
}

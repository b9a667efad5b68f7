use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Scheme and authority of the directory backend, e.g. `https://directory.example.org`.
    pub host: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_path")]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_port")]
    pub port: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: default_session_path(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_web_port(),
        }
    }
}

fn default_timeout() -> u64 {
    15
}

fn default_session_path() -> String {
    "memberdir.db".to_string()
}

fn default_web_port() -> u16 {
    8080
}

/// Load configuration from config.toml and environment variables
pub fn load() -> Result<Config, figment::Error> {
    figment().extract()
}

fn figment() -> Figment {
    Figment::new()
        .merge(Toml::file("config.toml"))
        // Use double-underscore nesting for snake_case keys
        .merge(Env::prefixed("MEMBERDIR_").split("__"))
}

/// Validate configuration and return a user-friendly error
pub fn validate(config: &Config) -> Result<(), String> {
    let api = &config.api;

    let host = match api.host.as_deref().map(str::trim) {
        Some(host) if !host.is_empty() => host,
        _ => return Err("api.host is required".into()),
    };

    if !(host.starts_with("http://") || host.starts_with("https://")) {
        return Err(format!("api.host must start with http:// or https:// (got {host})"));
    }

    if api.timeout_seconds == 0 {
        return Err("api.timeout_seconds must be greater than 0".into());
    }

    if config.session.path.trim().is_empty() {
        return Err("session.path must not be empty".into());
    }

    if config.web.port == 0 {
        return Err("web.port must be greater than 0".into());
    }

    Ok(())
}

/// A sanitized view of ApiConfig safe for logging
#[derive(Debug)]
#[allow(dead_code)]
pub struct SanitizedApiConfig {
    pub host: String,
    pub timeout_seconds: u64,
}

impl ApiConfig {
    /// Host with any trailing slash removed. Empty when unset.
    pub fn host(&self) -> &str {
        self.host
            .as_deref()
            .map(|h| h.trim().trim_end_matches('/'))
            .unwrap_or("")
    }

    pub fn sanitized_for_log(&self) -> SanitizedApiConfig {
        SanitizedApiConfig {
            host: self.host.clone().unwrap_or_else(|| "<not set>".into()),
            timeout_seconds: self.timeout_seconds,
        }
    }
}

//! Bearer-token API key authentication.
//!
//! Keys come from two sources: the PANELSIM_API_KEYS env var (inline JSON
//! object mapping key -> client name, parsed once at startup) or a JSON
//! file named by PANELSIM_API_KEYS_FILE (re-read per request so keys can be
//! rotated without a restart). Neither configured means auth is disabled.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, warn};

use panelsim_common::Config;

use crate::AppState;

pub struct AuthState {
    env_keys: Option<HashMap<String, String>>,
    keys_file: String,
}

impl AuthState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let env_keys = if config.api_keys.trim().is_empty() {
            None
        } else {
            Some(parse_keys(&config.api_keys).context("PANELSIM_API_KEYS contains invalid JSON")?)
        };

        Ok(Self {
            env_keys,
            keys_file: config.api_keys_file.clone(),
        })
    }

    /// Load the active key map. Env keys take priority; the key file is
    /// read on every call so edits apply immediately. `None` means auth is
    /// disabled.
    pub fn api_keys(&self) -> Result<Option<HashMap<String, String>>> {
        if let Some(keys) = &self.env_keys {
            return Ok(Some(keys.clone()));
        }

        if self.keys_file.trim().is_empty() {
            return Ok(None);
        }

        let path = Path::new(&self.keys_file);
        if !path.is_file() {
            warn!(path = %self.keys_file, "API keys file not found");
            return Ok(None);
        }

        let text = std::fs::read_to_string(path).context("Failed to read API keys file")?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(
            parse_keys(&text).context("API keys file contains invalid JSON")?,
        ))
    }
}

fn parse_keys(raw: &str) -> Result<HashMap<String, String>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let object = match value {
        serde_json::Value::Object(object) => object,
        _ => bail!("API keys must be a JSON object mapping keys to client names"),
    };

    let mut keys = HashMap::new();
    for (key, name) in object {
        match name {
            serde_json::Value::String(name) => {
                keys.insert(key, name);
            }
            _ => bail!("API key values must be client name strings"),
        }
    }
    Ok(keys)
}

/// Look up the bearer token in the key map; returns the client name.
pub fn check_token<'a>(keys: &'a HashMap<String, String>, token: &str) -> Option<&'a str> {
    keys.get(token).map(String::as_str)
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

fn unauthorized(detail: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(serde_json::json!({ "detail": detail })),
    )
        .into_response()
}

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let keys = match state.auth.api_keys() {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "Failed to load API keys");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Auth disabled: no keys configured.
    let Some(keys) = keys else {
        return next.run(request).await;
    };

    let Some(token) = bearer_token(&request) else {
        return unauthorized("Authentication required. Provide a Bearer token.");
    };

    match check_token(&keys, token) {
        Some(client) => {
            debug!(client, "Authenticated request");
            next.run(request).await
        }
        None => unauthorized("Invalid API key."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_key_map() {
        let keys = parse_keys(r#"{"sk-1": "acme", "sk-2": "globex"}"#).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys["sk-1"], "acme");
    }

    #[test]
    fn parse_rejects_non_object() {
        assert!(parse_keys(r#"["sk-1"]"#).is_err());
        assert!(parse_keys("not json").is_err());
        assert!(parse_keys(r#"{"sk-1": 42}"#).is_err());
    }

    #[test]
    fn check_token_matches() {
        let keys = parse_keys(r#"{"sk-1": "acme"}"#).unwrap();
        assert_eq!(check_token(&keys, "sk-1"), Some("acme"));
        assert_eq!(check_token(&keys, "sk-wrong"), None);
    }

    #[test]
    fn env_keys_take_priority_and_disable_file() {
        let config = Config {
            api_keys: r#"{"sk-env": "env-client"}"#.to_string(),
            api_keys_file: "/nonexistent/keys.json".to_string(),
            ..Config::default()
        };
        let auth = AuthState::from_config(&config).unwrap();
        let keys = auth.api_keys().unwrap().unwrap();
        assert_eq!(keys["sk-env"], "env-client");
    }

    #[test]
    fn no_sources_means_auth_disabled() {
        let auth = AuthState::from_config(&Config::default()).unwrap();
        assert!(auth.api_keys().unwrap().is_none());
    }

    #[test]
    fn missing_file_disables_auth_with_warning() {
        let config = Config {
            api_keys_file: "/nonexistent/keys.json".to_string(),
            ..Config::default()
        };
        let auth = AuthState::from_config(&config).unwrap();
        assert!(auth.api_keys().unwrap().is_none());
    }

    #[test]
    fn invalid_env_keys_fail_startup() {
        let config = Config {
            api_keys: "not json".to_string(),
            ..Config::default()
        };
        assert!(AuthState::from_config(&config).is_err());
    }
}

//! Service configuration.
//!
//! Everything is sourced from the environment (optionally seeded from a
//! `.env` file by `dotenvy` in `main`). Loading goes through a lookup
//! function so tests can feed a plain map instead of mutating process env.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Fatal startup errors. The service never becomes ready when one occurs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("service account key {path:?} unreadable: {source}")]
    KeyUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("service account key is malformed: {0}")]
    KeyMalformed(#[from] serde_json::Error),

    #[error("service account private key rejected: {0}")]
    KeyRejected(#[from] jsonwebtoken::errors::Error),
}

/// The fields of a Google service account key we actually need.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

// Keep the private key out of debug output.
impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

/// Where one side's processor lives.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub processor_id: String,
    /// Bare API host, e.g. `us-documentai.googleapis.com`.
    pub api_endpoint: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: ServiceAccountKey,
    pub project_id: String,
    pub location: String,
    pub front: ProcessorConfig,
    pub rear: ProcessorConfig,
    pub dev_client_origin: String,
    pub prod_client_origin: String,
    pub bind_addr: SocketAddr,
    pub max_upload_bytes: usize,
    /// Include the error source chain in 500 responses.
    pub expose_error_trace: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let credentials = load_credentials(&lookup)?;

        let front = ProcessorConfig {
            processor_id: required("FRONT_NATIONAL_ID_PROCESSOR_ID")?,
            api_endpoint: normalize_endpoint(&required("FRONT_NATIONAL_ID_API_ENDPOINT")?),
        };
        let rear = ProcessorConfig {
            processor_id: required("REAR_NATIONAL_ID_PROCESSOR_ID")?,
            api_endpoint: normalize_endpoint(&required("REAR_NATIONAL_ID_API_ENDPOINT")?),
        };
        validate_processor_id("FRONT_NATIONAL_ID_PROCESSOR_ID", &front.processor_id)?;
        validate_processor_id("REAR_NATIONAL_ID_PROCESSOR_ID", &rear.processor_id)?;

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                name: "BIND_ADDR",
                reason: e.to_string(),
            })?;

        let max_upload_bytes = match lookup("MAX_UPLOAD_BYTES") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                ConfigError::Invalid {
                    name: "MAX_UPLOAD_BYTES",
                    reason: e.to_string(),
                }
            })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let expose_error_trace = match lookup("EXPOSE_ERROR_TRACE") {
            Some(raw) => parse_bool("EXPOSE_ERROR_TRACE", &raw)?,
            None => cfg!(debug_assertions),
        };

        Ok(Self {
            credentials,
            project_id: required("DOC_AI_PROJECT_ID")?,
            location: required("PROJECT_LOCATION")?,
            front,
            rear,
            dev_client_origin: required("DEV_CLIENT_ORIGIN")?,
            prod_client_origin: required("PROD_CLIENT_ORIGIN")?,
            bind_addr,
            max_upload_bytes,
            expose_error_trace,
        })
    }

    /// `projects/{project}/locations/{location}/processors/{id}`
    pub fn processor_name(&self, processor: &ProcessorConfig) -> String {
        format!(
            "projects/{}/locations/{}/processors/{}",
            self.project_id, self.location, processor.processor_id
        )
    }
}

/// Inline JSON wins over a key file path.
fn load_credentials<F>(lookup: &F) -> Result<ServiceAccountKey, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(json) = lookup("GOOGLE_APPLICATION_CREDENTIALS_JSON").filter(|v| !v.trim().is_empty()) {
        return Ok(serde_json::from_str(&json)?);
    }

    let path = lookup("GOOGLE_APPLICATION_CREDENTIALS")
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .ok_or(ConfigError::Missing("GOOGLE_APPLICATION_CREDENTIALS_JSON"))?;

    let json = std::fs::read_to_string(&path).map_err(|source| ConfigError::KeyUnreadable {
        path: path.clone(),
        source,
    })?;
    Ok(serde_json::from_str(&json)?)
}

/// Accept `https://host/` as well as a bare host.
fn normalize_endpoint(raw: &str) -> String {
    raw.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

fn validate_processor_id(name: &'static str, id: &str) -> Result<(), ConfigError> {
    if id.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            name,
            reason: format!("processor id {:?} must be alphanumeric", id),
        })
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            name,
            reason: format!("expected a boolean, got {:?}", other),
        }),
    }
}

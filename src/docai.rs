//! Remote extraction client.
//!
//! Defines the [`ExtractionClient`] trait the rest of the service depends on,
//! and [`DocumentAiClient`], the Google Document AI REST implementation.
//! One processor per ID side, each with its own regional API endpoint.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::TokenSource;
use crate::config::{ConfigError, ProcessorConfig, Settings};
use crate::schema::{EntityMap, Extraction, ProcessorRole, RawDocument};

/// Hard deadline for a single remote call. No retries are attempted.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest slice of a remote error body kept in the error message.
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum RemoteServiceError {
    #[error("Document AI request to the {role} processor timed out after {} seconds", REQUEST_TIMEOUT.as_secs())]
    Timeout { role: ProcessorRole },

    #[error("Document AI request to the {role} processor failed")]
    Transport {
        role: ProcessorRole,
        #[source]
        source: reqwest::Error,
    },

    #[error("Document AI rejected the {role} request ({status}): {body}")]
    Rejected {
        role: ProcessorRole,
        status: u16,
        body: String,
    },

    #[error("Document AI returned an unreadable {role} response")]
    Decode {
        role: ProcessorRole,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not authenticate to Document AI: {0}")]
    Auth(String),
}

impl RemoteServiceError {
    fn from_reqwest(role: ProcessorRole, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { role }
        } else {
            Self::Transport { role, source }
        }
    }
}

/// Async trait implemented by every extraction backend.
#[async_trait::async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Fully qualified processor resource name for a side.
    fn processor_name(&self, role: ProcessorRole) -> &str;

    /// Run the side's processor over a document.
    async fn extract(
        &self,
        document: &RawDocument,
        role: ProcessorRole,
    ) -> Result<Extraction, RemoteServiceError>;

    /// Ask the remote whether the side's processor exists; returns its name.
    async fn resolve_processor(&self, role: ProcessorRole) -> Result<String, RemoteServiceError>;
}

struct ProcessorTarget {
    name: String,
    base_url: String,
}

impl ProcessorTarget {
    fn resource_url(&self) -> String {
        format!("{}/{}", self.base_url, self.name)
    }

    fn process_url(&self) -> String {
        format!("{}:process", self.resource_url())
    }
}

/// Document AI REST client, shared by all requests for the process lifetime.
pub struct DocumentAiClient {
    http: reqwest::Client,
    tokens: TokenSource,
    front: ProcessorTarget,
    rear: ProcessorTarget,
}

impl DocumentAiClient {
    pub fn new(settings: &Settings) -> Result<Self, ConfigError> {
        let tokens = TokenSource::new(&settings.credentials)?;
        let target = |processor: &ProcessorConfig| ProcessorTarget {
            name: settings.processor_name(processor),
            base_url: format!("https://{}/v1", processor.api_endpoint),
        };

        let client = Self {
            http: reqwest::Client::new(),
            front: target(&settings.front),
            rear: target(&settings.rear),
            tokens,
        };

        info!("Service account: {}", client.tokens.client_email());
        info!("Front processor: {} via {}", client.front.name, client.front.base_url);
        info!("Rear processor: {} via {}", client.rear.name, client.rear.base_url);
        Ok(client)
    }

    fn target(&self, role: ProcessorRole) -> &ProcessorTarget {
        match role {
            ProcessorRole::Front => &self.front,
            ProcessorRole::Rear => &self.rear,
        }
    }

    async fn bearer(&self, role: ProcessorRole) -> Result<String, RemoteServiceError> {
        let exchange = self.tokens.access_token(&self.http);
        match tokio::time::timeout(REQUEST_TIMEOUT, exchange).await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(e)) if e.downcast_ref::<reqwest::Error>().is_some_and(|r| r.is_timeout()) => {
                Err(RemoteServiceError::Timeout { role })
            }
            Ok(Err(e)) => Err(RemoteServiceError::Auth(format!("{:#}", e))),
            Err(_) => Err(RemoteServiceError::Timeout { role }),
        }
    }

    /// Send a request and return the body of a 2xx response.
    async fn send(
        &self,
        role: ProcessorRole,
        request: reqwest::RequestBuilder,
    ) -> Result<String, RemoteServiceError> {
        let response = request
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| RemoteServiceError::from_reqwest(role, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteServiceError::from_reqwest(role, e))?;

        if !status.is_success() {
            return Err(RemoteServiceError::Rejected {
                role,
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        Ok(body)
    }
}

#[async_trait::async_trait]
impl ExtractionClient for DocumentAiClient {
    fn processor_name(&self, role: ProcessorRole) -> &str {
        &self.target(role).name
    }

    async fn extract(
        &self,
        document: &RawDocument,
        role: ProcessorRole,
    ) -> Result<Extraction, RemoteServiceError> {
        let target = self.target(role);
        let token = self.bearer(role).await?;

        let body = ProcessRequest {
            raw_document: ApiRawDocument {
                content: BASE64.encode(&document.content),
                mime_type: document.mime.as_str(),
            },
        };

        info!(
            "Calling {} processor ({} bytes, {})",
            role,
            document.content.len(),
            document.mime.as_str()
        );

        let raw = self
            .send(
                role,
                self.http
                    .post(target.process_url())
                    .bearer_auth(&token)
                    .json(&body),
            )
            .await?;

        let extraction = parse_process_response(&raw)
            .map_err(|source| RemoteServiceError::Decode { role, source })?;

        debug!(
            "{} processor returned {} chars of text, {} entity types",
            role,
            extraction.text.len(),
            extraction.entities.len()
        );
        Ok(extraction)
    }

    async fn resolve_processor(&self, role: ProcessorRole) -> Result<String, RemoteServiceError> {
        let target = self.target(role);
        let token = self.bearer(role).await?;

        let raw = self
            .send(role, self.http.get(target.resource_url()).bearer_auth(&token))
            .await?;

        let processor: ApiProcessor = serde_json::from_str(&raw)
            .map_err(|source| RemoteServiceError::Decode { role, source })?;

        info!(
            "Resolved {} processor {} ({}, state={})",
            role,
            processor.name,
            processor.display_name.as_deref().unwrap_or("unnamed"),
            processor.state.as_deref().unwrap_or("UNKNOWN")
        );
        Ok(processor.name)
    }
}

// ── Document AI wire types ──────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest<'a> {
    raw_document: ApiRawDocument<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRawDocument<'a> {
    content: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    document: ApiDocument,
}

#[derive(Default, Deserialize)]
struct ApiDocument {
    #[serde(default)]
    text: String,
    #[serde(default)]
    entities: Vec<ApiEntity>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEntity {
    #[serde(rename = "type", default)]
    entity_type: String,
    #[serde(default)]
    mention_text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiProcessor {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

fn parse_process_response(raw: &str) -> Result<Extraction, serde_json::Error> {
    let response: ProcessResponse = serde_json::from_str(raw)?;
    Ok(Extraction {
        text: response.document.text,
        entities: collect_entities(response.document.entities),
    })
}

/// Top-level entities only; a repeated type keeps the last mention.
fn collect_entities(entities: Vec<ApiEntity>) -> EntityMap {
    let mut map = EntityMap::new();
    for entity in entities {
        map.insert(entity.entity_type, entity.mention_text);
    }
    map
}

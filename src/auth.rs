//! Service account OAuth2 tokens for Google APIs.
//!
//! Mints an RS256 JWT from the service account key, exchanges it for an
//! access token (JWT-bearer grant) and caches the token until shortly
//! before it expires.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{ConfigError, ServiceAccountKey};
use crate::docai::REQUEST_TIMEOUT;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const TOKEN_LIFETIME_SECS: u64 = 3600;
/// Refresh this many seconds before the remote expiry.
const EXPIRY_MARGIN_SECS: u64 = 60;

pub struct TokenSource {
    client_email: String,
    token_uri: String,
    encoding_key: jsonwebtoken::EncodingKey,
    cache: Mutex<Option<CachedToken>>,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: u64,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

impl TokenSource {
    /// Parses the private key up front so a bad key fails at startup.
    pub fn new(key: &ServiceAccountKey) -> Result<Self, ConfigError> {
        let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        Ok(Self {
            client_email: key.client_email.clone(),
            token_uri: key.token_uri.clone(),
            encoding_key,
            cache: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Get a valid access token, refreshing if expired.
    ///
    /// The cache lock is held across the exchange so concurrent callers
    /// wait for one refresh instead of each minting their own. The exchange
    /// shares the per-call deadline, so a stalled token endpoint releases
    /// the lock after [`REQUEST_TIMEOUT`].
    pub async fn access_token(&self, client: &reqwest::Client) -> Result<String> {
        let mut cache = self.cache.lock().await;
        let now = now_secs();

        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh(now) {
                return Ok(cached.access_token.clone());
            }
        }

        let jwt = self.sign_assertion(now)?;

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        debug!("Exchanging JWT assertion for {} at {}", self.client_email, self.token_uri);

        let resp: TokenResponse = client
            .post(&self.token_uri)
            .timeout(REQUEST_TIMEOUT)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", jwt.as_str()),
            ])
            .send()
            .await
            .context("Token exchange request failed")?
            .error_for_status()
            .context("Token exchange returned error")?
            .json()
            .await
            .context("Failed to parse token response")?;

        info!("Obtained access token for {} (expires in {}s)", self.client_email, resp.expires_in);

        let token = resp.access_token.clone();
        *cache = Some(CachedToken {
            access_token: resp.access_token,
            expires_at: now + resp.expires_in,
        });

        Ok(token)
    }

    fn sign_assertion(&self, now: u64) -> Result<String> {
        let claims = Claims {
            iss: &self.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        jsonwebtoken::encode(&header, &claims, &self.encoding_key).context("Failed to encode JWT")
    }
}

impl CachedToken {
    fn is_fresh(&self, now: u64) -> bool {
        now < self.expires_at.saturating_sub(EXPIRY_MARGIN_SECS)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

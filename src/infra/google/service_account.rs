// =============================================================================
// GOOGLE SERVICE ACCOUNT AUTHENTICATION
// =============================================================================
//
// Every Google client in this crate shares one authenticator. It signs a JWT
// with the service account's private key, trades it for an access token at the
// account's token URI, and caches the token until shortly before it expires.
//
// **Setup:**
// 1. Create a service account in Google Cloud Console and download a JSON key.
// 2. Enable the Docs, Drive, Sheets and Gmail APIs for the project.
// 3. Share the spreadsheet, the template and the parent folder with the
//    service account email.
// 4. Sending mail needs domain-wide delegation: grant the gmail.send scope to
//    the service account in the Workspace admin console and set
//    `GOOGLE_IMPERSONATE_USER` to the mailbox to send from.
//
// **Environment Variables:**
// - `GOOGLE_SERVICE_ACCOUNT_KEY` - Path to the service account JSON file
// - `GOOGLE_SERVICE_ACCOUNT_JSON` - The JSON content directly (for deployment)
// - `GOOGLE_IMPERSONATE_USER` - Optional user to act as (`sub` claim)

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::core::backend_error::BackendError;

/// Scopes the pipeline needs: edit documents, manage files, read/write the
/// sheet, send mail.
pub const PIPELINE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/documents",
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/gmail.send",
];

/// Service account credentials from the JSON key file.
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountCredentials {
    /// The service account email (used as issuer in JWT).
    client_email: String,

    /// The private key in PEM format.
    private_key: String,

    /// The token URI (where to exchange JWT for access token).
    token_uri: String,
}

/// JWT claims for Google OAuth2.
#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    exp: u64,
    /// Impersonated user for domain-wide delegation.
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

/// Authenticator that handles OAuth2 with service account credentials.
pub struct ServiceAccountAuth {
    credentials: ServiceAccountCredentials,
    scopes: Vec<String>,
    subject: Option<String>,
    client: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl ServiceAccountAuth {
    /// Creates a new authenticator from a JSON key file path.
    pub async fn from_file(path: &str) -> Result<Self, BackendError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BackendError::Auth(format!("cannot read key file {}: {}", path, e)))?;
        Self::from_json(&content)
    }

    /// Creates a new authenticator from JSON content.
    pub fn from_json(json: &str) -> Result<Self, BackendError> {
        let credentials: ServiceAccountCredentials = serde_json::from_str(json)
            .map_err(|e| BackendError::Auth(format!("invalid service account key: {}", e)))?;
        Ok(Self {
            credentials,
            scopes: PIPELINE_SCOPES.iter().map(|s| s.to_string()).collect(),
            subject: None,
            client: Client::new(),
            cached_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Creates from environment variables.
    pub async fn from_env() -> Result<Self, BackendError> {
        let auth = if let Ok(path) = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY") {
            Self::from_file(&path).await?
        } else if let Ok(json) = std::env::var("GOOGLE_SERVICE_ACCOUNT_JSON") {
            Self::from_json(&json)?
        } else {
            return Err(BackendError::Auth(
                "Neither GOOGLE_SERVICE_ACCOUNT_KEY nor GOOGLE_SERVICE_ACCOUNT_JSON is set."
                    .to_string(),
            ));
        };

        let subject = std::env::var("GOOGLE_IMPERSONATE_USER")
            .ok()
            .filter(|s| !s.trim().is_empty());
        Ok(auth.with_subject(subject))
    }

    pub fn with_subject(mut self, subject: Option<String>) -> Self {
        self.subject = subject;
        self
    }

    pub fn client_email(&self) -> &str {
        &self.credentials.client_email
    }

    /// Gets a valid access token, refreshing if necessary.
    pub async fn get_access_token(&self) -> Result<String, BackendError> {
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > SystemTime::now() + Duration::from_secs(60) {
                    return Ok(token.token.clone());
                }
            }
        }

        let (token, expires_in) = self.fetch_new_token().await?;

        {
            let mut cached = self.cached_token.write().await;
            *cached = Some(CachedToken {
                token: token.clone(),
                expires_at: SystemTime::now() + Duration::from_secs(expires_in),
            });
        }

        Ok(token)
    }

    fn build_claims(&self, now: u64) -> JwtClaims {
        JwtClaims {
            iss: self.credentials.client_email.clone(),
            scope: self.scopes.join(" "),
            aud: self.credentials.token_uri.clone(),
            iat: now,
            exp: now + 3600,
            sub: self.subject.clone(),
        }
    }

    async fn fetch_new_token(&self) -> Result<(String, u64), BackendError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| BackendError::Auth(e.to_string()))?
            .as_secs();

        let header = Header::new(Algorithm::RS256);
        let key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())
            .map_err(|e| BackendError::Auth(format!("invalid private key: {}", e)))?;
        let jwt = encode(&header, &self.build_claims(now), &key)
            .map_err(|e| BackendError::Auth(format!("cannot sign JWT: {}", e)))?;

        let response = self
            .client
            .post(&self.credentials.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Auth(format!(
                "Token exchange failed ({}): {}",
                status, text
            )));
        }

        let token_response: TokenResponse = response.json().await?;
        tracing::debug!(
            client_email = %self.credentials.client_email,
            expires_in = token_response.expires_in,
            "Fetched new access token"
        );
        Ok((token_response.access_token, token_response.expires_in))
    }
}

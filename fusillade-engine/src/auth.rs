// fusillade-engine: Authentication providers
//
// Providers hand out bearer tokens. The OAuth2 variants cache the access
// token and coalesce concurrent fetches: the first caller performs the
// HTTP exchange while the rest wait on the cache lock and read the fresh
// value.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use fusillade_config::AuthConfig;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Source of bearer tokens for outgoing requests
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current token, fetching or refreshing as needed
    async fn token(&self) -> EngineResult<String>;

    /// Append the Authorization header to a header list
    async fn inject_header(&self, headers: &mut Vec<(String, String)>) -> EngineResult<()> {
        let token = self.token().await?;
        headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        Ok(())
    }
}

/// Build a provider from configuration
pub fn from_config(config: &AuthConfig) -> EngineResult<Arc<dyn AuthProvider>> {
    match config {
        AuthConfig::Static { token } => Ok(Arc::new(StaticBearer::new(token.clone()))),
        AuthConfig::ClientCredentials {
            token_url,
            client_id,
            client_secret,
            scopes,
            refresh_before_expiry_s,
        } => Ok(Arc::new(OAuth2Provider::new(
            token_url.clone(),
            client_id.clone(),
            client_secret.clone(),
            scopes.clone(),
            Grant::ClientCredentials,
            Duration::from_secs(*refresh_before_expiry_s),
        )?)),
        AuthConfig::Password {
            token_url,
            client_id,
            client_secret,
            username,
            password,
            scopes,
            refresh_before_expiry_s,
        } => Ok(Arc::new(OAuth2Provider::new(
            token_url.clone(),
            client_id.clone(),
            client_secret.clone(),
            scopes.clone(),
            Grant::Password {
                username: username.clone(),
                password: password.clone(),
            },
            Duration::from_secs(*refresh_before_expiry_s),
        )?)),
    }
}

/// Pre-supplied token, no I/O
pub struct StaticBearer {
    token: String,
}

impl StaticBearer {
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

#[async_trait]
impl AuthProvider for StaticBearer {
    async fn token(&self) -> EngineResult<String> {
        Ok(self.token.clone())
    }
}

/// OAuth2 grant flavor
pub enum Grant {
    ClientCredentials,
    Password { username: String, password: String },
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// OAuth2 token provider (client-credentials or resource-owner-password)
///
/// Client credentials always travel as HTTP Basic authentication, never
/// in the form body.
pub struct OAuth2Provider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    grant: Grant,
    refresh_before: Duration,
    cache: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

impl OAuth2Provider {
    pub fn new(
        token_url: String,
        client_id: String,
        client_secret: String,
        scopes: Vec<String>,
        grant: Grant,
        refresh_before: Duration,
    ) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::BuildFailed(format!("auth client: {}", e)))?;
        Ok(Self {
            http,
            token_url,
            client_id,
            client_secret,
            scopes,
            grant,
            refresh_before,
            cache: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> EngineResult<CachedToken> {
        let mut form: Vec<(&str, String)> = Vec::with_capacity(4);
        match &self.grant {
            Grant::ClientCredentials => {
                form.push(("grant_type", "client_credentials".to_string()));
            }
            Grant::Password { username, password } => {
                form.push(("grant_type", "password".to_string()));
                form.push(("username", username.clone()));
                form.push(("password", password.clone()));
            }
        }
        if !self.scopes.is_empty() {
            form.push(("scope", self.scopes.join(" ")));
        }

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| EngineError::AuthFailed(format!("token request: {}", e)))?;

        let status = response.status();
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| EngineError::AuthFailed(format!("token response: {}", e)))?;

        if !status.is_success() {
            let detail = body
                .error_description
                .or(body.error)
                .unwrap_or_else(|| status.to_string());
            return Err(EngineError::AuthFailed(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                detail
            )));
        }

        if let Some(error) = body.error {
            let detail = body.error_description.unwrap_or_default();
            return Err(EngineError::AuthFailed(format!("{}: {}", error, detail)));
        }

        let token = body
            .access_token
            .ok_or_else(|| EngineError::AuthFailed("response missing access_token".to_string()))?;

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(3600));
        let expires_at = Instant::now() + lifetime.saturating_sub(self.refresh_before);

        debug!(lifetime_s = lifetime.as_secs(), "fetched oauth2 token");
        Ok(CachedToken { token, expires_at })
    }
}

#[async_trait]
impl AuthProvider for OAuth2Provider {
    async fn token(&self) -> EngineResult<String> {
        // The lock is held across the fetch so concurrent callers coalesce
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_bearer() {
        let provider = StaticBearer::new("abc".to_string());
        assert_eq!(provider.token().await.unwrap(), "abc");

        let mut headers = Vec::new();
        provider.inject_header(&mut headers).await.unwrap();
        assert_eq!(
            headers,
            vec![("Authorization".to_string(), "Bearer abc".to_string())]
        );
    }
}

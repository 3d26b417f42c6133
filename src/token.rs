//! Access-token acquisition
//!
//! Exchanges a signed, time-bounded service-account assertion for a
//! short-lived bearer token. Every inbound event mints its own token;
//! nothing is cached or refreshed.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;

use crate::config::ServiceAccountConfig;
use crate::{Error, Result};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime in seconds; also the implied token expiry
const ASSERTION_TTL_SECS: i64 = 3600;

/// Claims for the service-account assertion
#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    scope: &'a str,
}

/// Mints bearer tokens from the identity provider
pub struct TokenProvider {
    account: ServiceAccountConfig,
    client: reqwest::Client,
}

impl TokenProvider {
    /// Create a new token provider
    #[must_use]
    pub fn new(account: ServiceAccountConfig) -> Self {
        Self {
            account,
            client: reqwest::Client::new(),
        }
    }

    /// Mint a fresh bearer token
    ///
    /// # Errors
    ///
    /// Returns `Error::Token` if the assertion cannot be signed, the
    /// exchange cannot be reached, or the provider response carries no
    /// access-token field (the provider's error description, or the raw
    /// body, is included in the message).
    pub async fn fetch(&self) -> Result<String> {
        let assertion = self.sign_assertion()?;

        let response = self
            .client
            .post(&self.account.token_uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Token(format!("token exchange failed: {e}")))?;

        let body = response
            .text()
            .await
            .map_err(|e| Error::Token(format!("token response read failed: {e}")))?;

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|_| Error::Token(format!("token response is not JSON: {body}")))?;

        if let Some(token) = parsed.get("access_token").and_then(Value::as_str) {
            return Ok(token.to_owned());
        }

        let detail = parsed
            .get("error_description")
            .and_then(Value::as_str)
            .unwrap_or(&body);
        Err(Error::Token(format!("no access token in response: {detail}")))
    }

    /// Build and sign the time-bounded assertion
    fn sign_assertion(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.account.client_email,
            sub: &self.account.client_email,
            aud: &self.account.token_uri,
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
            scope: &self.account.scope,
        };

        let key = EncodingKey::from_rsa_pem(self.account.private_key.expose_secret().as_bytes())
            .map_err(|e| Error::Token(format!("invalid private key: {e}")))?;

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| Error::Token(format!("assertion signing failed: {e}")))
    }
}

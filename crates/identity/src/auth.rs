//! Admin credentials and wallet session tokens
//!
//! Admin routes are protected by a static bearer token. Wallet sessions use
//! HS256 JWTs with an explicit `type` claim separating access from refresh
//! tokens. Expiry is checked against the injected [`Clock`].

use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ethernity_core::config::SecurityConfig;
use ethernity_core::Clock;

use crate::{IdentityError, IdentityResult};

/// Kind of session token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, usually a wallet address
    pub sub: String,
    /// Expiry (seconds since epoch)
    pub exp: i64,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// Access plus refresh token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

/// Issues and verifies session tokens
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl JwtManager {
    /// Create a manager from the security settings
    pub fn new(config: &SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        let secret = config.secret_key.as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl: Duration::minutes(config.access_token_expire_minutes),
            refresh_ttl: Duration::minutes(config.refresh_token_expire_minutes),
            clock,
        }
    }

    fn issue(&self, subject: &str, token_type: TokenType, ttl: Duration) -> IdentityResult<String> {
        let now = self.clock.now();
        let claims = Claims {
            sub: subject.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            token_type,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| IdentityError::TokenEncoding(e.to_string()))
    }

    /// Create a short-lived access token
    pub fn create_access_token(&self, subject: &str) -> IdentityResult<String> {
        self.issue(subject, TokenType::Access, self.access_ttl)
    }

    /// Create a long-lived refresh token
    pub fn create_refresh_token(&self, subject: &str) -> IdentityResult<String> {
        self.issue(subject, TokenType::Refresh, self.refresh_ttl)
    }

    /// Create both tokens for a subject
    pub fn create_token_pair(&self, subject: &str) -> IdentityResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.create_access_token(subject)?,
            refresh_token: self.create_refresh_token(subject)?,
            token_type: "bearer".to_string(),
        })
    }

    /// Decode and check signature and expiry
    pub fn decode_token(&self, token: &str) -> IdentityResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against our own clock
        validation.validate_exp = false;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            warn!("Invalid token: {}", e);
            IdentityError::InvalidToken
        })?;

        if data.claims.exp <= self.clock.now().timestamp() {
            debug!("Expired token for {}", data.claims.sub);
            return Err(IdentityError::TokenExpired);
        }
        Ok(data.claims)
    }

    fn verify_type(&self, token: &str, expected: TokenType) -> IdentityResult<Claims> {
        let claims = self.decode_token(token)?;
        if claims.token_type != expected {
            return Err(IdentityError::InvalidTokenType);
        }
        Ok(claims)
    }

    /// Verify an access token
    pub fn verify_access_token(&self, token: &str) -> IdentityResult<Claims> {
        self.verify_type(token, TokenType::Access)
    }

    /// Verify a refresh token
    pub fn verify_refresh_token(&self, token: &str) -> IdentityResult<Claims> {
        self.verify_type(token, TokenType::Refresh)
    }

    /// Exchange a refresh token for a new access token
    pub fn refresh_access_token(&self, refresh_token: &str) -> IdentityResult<String> {
        let claims = self.verify_refresh_token(refresh_token)?;
        self.create_access_token(&claims.sub)
    }
}

/// Result of a successful admin login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminLogin {
    pub access_token: String,
}

/// Static admin credentials
#[derive(Debug, Clone)]
pub struct AdminAuth {
    email: String,
    password: String,
    token: String,
    development: bool,
}

impl AdminAuth {
    /// Create admin auth from the security settings
    pub fn new(config: &SecurityConfig, development: bool) -> Self {
        Self {
            email: config.admin_email.clone(),
            password: config.admin_password.clone(),
            token: config.admin_token.clone(),
            development,
        }
    }

    /// Password login, only available in development
    pub fn login(&self, email: &str, password: &str) -> IdentityResult<AdminLogin> {
        let matches = constant_time_eq(email.as_bytes(), self.email.as_bytes())
            & constant_time_eq(password.as_bytes(), self.password.as_bytes());
        if !matches || !self.development {
            warn!("Rejected admin login for {}", email);
            return Err(IdentityError::InvalidCredentials);
        }
        Ok(AdminLogin {
            access_token: self.token.clone(),
        })
    }

    /// Check a bearer token against the admin token
    pub fn verify_token(&self, bearer: &str) -> bool {
        !self.token.is_empty() && constant_time_eq(bearer.as_bytes(), self.token.as_bytes())
    }
}

/// Compare two byte strings without short-circuiting on the first mismatch
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

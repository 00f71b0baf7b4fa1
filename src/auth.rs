//! Bearer-token validation at the socket handshake and HTTP surface.
//!
//! Tokens are HS256 JWTs issued by the external auth service. The gate only
//! validates signature and expiry and extracts the user identity; there is no
//! per-message re-check, so session identity is fixed for the connection.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::sync::{SyncError, SyncResult};

/// Minimum length for the HS256 signing secret.
const MIN_SECRET_LEN: usize = 32;

/// An authenticated user as extracted from a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    email: String,
    iat: i64,
    exp: i64,
}

/// Validates bearer tokens presented at handshake.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Result<Self, String> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(format!(
                "token secret must be at least {} characters long",
                MIN_SECRET_LEN
            ));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Validate signature and expiry; returns the embedded identity.
    pub fn verify(&self, token: &str) -> SyncResult<AuthUser> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| SyncError::Auth(e.to_string()))?
            .claims;

        Ok(AuthUser {
            id: claims.sub,
            username: claims.username,
            email: claims.email,
        })
    }

    /// Issue a token for the given identity. The production issuer is the
    /// external auth service; this exists for tests and operator tooling.
    pub fn issue_token(&self, user: &AuthUser, ttl_seconds: i64) -> SyncResult<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            iat: now,
            exp: now + ttl_seconds,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SyncError::Auth(e.to_string()))
    }
}

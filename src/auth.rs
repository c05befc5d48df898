//! Bearer-token verification for the HTTP surface and the game channel.
//!
//! Tokens are HS256 JWTs issued by the external user service with a 72-hour
//! lifetime; the only claim this server reads is `id`, the numeric user id.
//! The issuing helper exists for tests and operational tooling.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::protocol::PlayerId;

/// Token lifetime: 72 hours.
pub const TOKEN_LIFETIME_SECS: i64 = 72 * 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub id: u64,
    pub exp: i64,
}

pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenAuthority {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: u64) -> AppResult<String> {
        let claims = Claims {
            id: user_id,
            exp: chrono::Utc::now().timestamp() + TOKEN_LIFETIME_SECS,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::internal("failed to sign token", e.into()))
    }

    /// Verify signature and expiry; returns the player id string the rest of
    /// the server works with.
    pub fn verify(&self, token: &str) -> AppResult<PlayerId> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| AppError::unauthorized("Invalid or expired token"))?;
        Ok(data.claims.id.to_string())
    }
}

/// Extract the raw token from an `Authorization: Bearer …` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .or_else(|| header_value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_to_the_user_id() {
        let authority = TokenAuthority::new("test-secret");
        let token = authority.issue(42).unwrap();
        assert_eq!(authority.verify(&token).unwrap(), "42");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = TokenAuthority::new("secret-a");
        let verifier = TokenAuthority::new("secret-b");
        let token = issuer.issue(42).unwrap();
        let err = verifier.verify(&token).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Unauthorized);
    }

    #[test]
    fn garbage_is_rejected() {
        let authority = TokenAuthority::new("test-secret");
        assert!(authority.verify("not-a-token").is_err());
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}

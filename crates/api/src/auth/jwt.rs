//! JWT bearer validation
//!
//! Tokens are issued by the session service; this server only checks them.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use huddle_shared::UserId;

/// Claims the realtime server relies on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// Validates bearer tokens signed with the shared secret
#[derive(Clone)]
pub struct JwtManager {
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Validate and decode a token
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60; // 60 second clock skew tolerance

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidToken => JwtError::Invalid,
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => JwtError::Invalid,
                _ => JwtError::Validation(e.to_string()),
            })
    }

    /// Validate a token presented on behalf of `user_id`
    pub fn authorize(&self, token: &str, user_id: UserId) -> Result<Claims, JwtError> {
        let claims = self.validate_token(token)?;
        if claims.sub != user_id.0 {
            return Err(JwtError::SubjectMismatch);
        }
        Ok(claims)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Token belongs to another user")]
    SubjectMismatch,
    #[error("Token validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use time::{Duration, OffsetDateTime};

    const SECRET: &str = "test-secret-key-at-least-32-chars!";

    fn token(sub: Uuid, expires_in: Duration) -> String {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub,
            iat: now.unix_timestamp(),
            exp: (now + expires_in).unix_timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("Failed to encode token")
    }

    #[test]
    fn test_authorize_matching_subject() {
        let jwt = JwtManager::new(SECRET);
        let user_id = UserId::new();

        let claims = jwt
            .authorize(&token(user_id.0, Duration::hours(1)), user_id)
            .expect("Token should be accepted");
        assert_eq!(claims.sub, user_id.0);
    }

    #[test]
    fn test_subject_mismatch() {
        let jwt = JwtManager::new(SECRET);
        let result = jwt.authorize(&token(Uuid::new_v4(), Duration::hours(1)), UserId::new());
        assert!(matches!(result, Err(JwtError::SubjectMismatch)));
    }

    #[test]
    fn test_expired_token() {
        let jwt = JwtManager::new(SECRET);
        let result = jwt.validate_token(&token(Uuid::new_v4(), Duration::hours(-2)));
        assert!(matches!(result, Err(JwtError::Expired)));
    }

    #[test]
    fn test_wrong_secret() {
        let jwt = JwtManager::new("another-secret-that-is-32-chars-long!!");
        let result = jwt.validate_token(&token(Uuid::new_v4(), Duration::hours(1)));
        assert!(result.is_err());
    }
}

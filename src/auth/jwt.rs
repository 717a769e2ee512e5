use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64,
    pub iat: i64,
    pub jti: Uuid,
    pub token_type: TokenType,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Issues and verifies the HS256 tokens used for API authentication.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn issue(&self, user_id: Uuid, token_type: TokenType) -> Result<String, AuthError> {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: user_id,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4(),
            token_type,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Encoding(e.to_string()))
    }

    pub fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access: self.issue(user_id, TokenType::Access)?,
            refresh: self.issue(user_id, TokenType::Refresh)?,
        })
    }

    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => {
                    tracing::debug!(error = %e, "Rejected token");
                    AuthError::InvalidToken
                }
            })?;

        if data.claims.token_type != expected {
            return Err(AuthError::WrongTokenType);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("test-secret", Duration::minutes(5), Duration::days(1))
    }

    #[test]
    fn issued_access_token_verifies() {
        let tokens = service();
        let user_id = Uuid::new_v4();
        let token = tokens.issue(user_id, TokenType::Access).unwrap();
        let claims = tokens.verify(&token, TokenType::Access).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let tokens = service();
        let pair = tokens.issue_pair(Uuid::new_v4()).unwrap();
        assert!(matches!(
            tokens.verify(&pair.refresh, TokenType::Access),
            Err(AuthError::WrongTokenType)
        ));
        assert!(tokens.verify(&pair.refresh, TokenType::Refresh).is_ok());
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = TokenService::new("test-secret", Duration::minutes(-10), Duration::days(1));
        let token = tokens.issue(Uuid::new_v4(), TokenType::Access).unwrap();
        assert!(matches!(
            tokens.verify(&token, TokenType::Access),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let other = TokenService::new("other-secret", Duration::minutes(5), Duration::days(1));
        let token = other.issue(Uuid::new_v4(), TokenType::Access).unwrap();
        assert!(matches!(
            service().verify(&token, TokenType::Access),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            service().verify("garbage", TokenType::Access),
            Err(AuthError::InvalidToken)
        ));
    }
}

//! Bearer-token verification. Tokens are issued by the external identity
//! service; this side only checks the signature and expiry and reads the user id.

use crate::{
    error::{MarketError, Result},
    UserId,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: usize,
}

impl Claims {
    pub fn user_id(&self) -> Result<UserId> {
        match self.sub.parse::<UserId>() {
            Ok(id) if id > 0 => Ok(id),
            _ => Err(MarketError::Auth(format!("Invalid subject: {}", self.sub))),
        }
    }
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn validate_jwt(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| MarketError::Auth(format!("Invalid JWT: {}", e)))
    }

    /// Resolves an `Authorization` header value to the acting user.
    pub fn authenticate(&self, header: Option<&str>) -> Result<UserId> {
        let token = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| MarketError::Auth("Missing bearer token".to_string()))?;

        self.validate_jwt(token)?.user_id()
    }
}

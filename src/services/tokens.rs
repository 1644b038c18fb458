use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::models::access::UserContext;

/// Claims carried by session bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Group names; unknown ones are ignored.
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: u64,
}

/// Verifies HS256 bearer tokens issued by the session service.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<UserContext, TokenError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(UserContext::from_group_names(
            data.claims.sub,
            &data.claims.roles,
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid bearer token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

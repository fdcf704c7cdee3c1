//! JWT session token validation
//!
//! Sessions are bearer tokens minted by the external identity provider and
//! verified here with a shared HS256 secret. Tokens carry identity only;
//! privilege is always re-read from the profiles table per call.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::types::{AtrioError, Result};

/// Secret used when dev mode runs without JWT_SECRET
pub const DEV_SECRET: &str = "dev-only-insecure-secret";

/// Claims carried in a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Identity provider subject, the profile id
    pub sub: String,
    /// Account email, when the provider includes it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Issued-at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
}

/// Outcome of token verification
#[derive(Debug)]
pub struct TokenValidationResult {
    pub valid: bool,
    pub claims: Option<Claims>,
    pub error: Option<String>,
}

impl TokenValidationResult {
    fn ok(claims: Claims) -> Self {
        Self { valid: true, claims: Some(claims), error: None }
    }

    fn fail(error: String) -> Self {
        Self { valid: false, claims: None, error: Some(error) }
    }
}

/// Extract a bearer token from an Authorization header value
///
/// Accepts `Bearer <token>` (scheme case-insensitive) or a raw token.
pub fn extract_token_from_header(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    if value.is_empty() {
        return None;
    }
    if value.len() > 7 && value[..7].eq_ignore_ascii_case("bearer ") {
        let token = value[7..].trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    } else {
        Some(value)
    }
}

/// HS256 validator for identity-provider session tokens
#[derive(Clone)]
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry_seconds: u64,
}

impl JwtValidator {
    pub fn new(secret: &str, expiry_seconds: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry_seconds,
        }
    }

    /// Verify a token's signature and expiry
    pub fn verify_token(&self, token: &str) -> TokenValidationResult {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => TokenValidationResult::ok(data.claims),
            Err(e) => TokenValidationResult::fail(e.to_string()),
        }
    }

    /// Mint a token locally (dev tooling and tests; production tokens come
    /// from the identity provider)
    pub fn create_token(&self, sub: &str, email: Option<&str>) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            email: email.map(|e| e.to_string()),
            iat: now,
            exp: now + self.expiry_seconds as i64,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AtrioError::Internal(format!("token encoding: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_token_from_header(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(Some("bearer abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(Some("abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(Some("Bearer ")), None);
        assert_eq!(extract_token_from_header(Some("")), None);
        assert_eq!(extract_token_from_header(None), None);
    }

    #[test]
    fn test_round_trip() {
        let jwt = JwtValidator::new("test-secret", 3600);
        let token = jwt.create_token("user-1", Some("ana@example.org")).unwrap();

        let result = jwt.verify_token(&token);
        assert!(result.valid);
        let claims = result.claims.unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email.as_deref(), Some("ana@example.org"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let minting = JwtValidator::new("secret-a", 3600);
        let verifying = JwtValidator::new("secret-b", 3600);

        let token = minting.create_token("user-1", None).unwrap();
        let result = verifying.verify_token(&token);
        assert!(!result.valid);
        assert!(result.claims.is_none());
        assert!(result.error.is_some());
    }

    #[test]
    fn test_expired_token_rejected() {
        let jwt = JwtValidator::new("test-secret", 3600);
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "user-1".to_string(),
            email: None,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        let result = jwt.verify_token(&token);
        assert!(!result.valid);
    }

    #[test]
    fn test_garbage_token_rejected() {
        let jwt = JwtValidator::new("test-secret", 3600);
        assert!(!jwt.verify_token("not.a.token").valid);
        assert!(!jwt.verify_token("").valid);
    }
}

use axum::http::{self, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::ws::sessions::Identity;

/// Query parameters a client may pass on the WebSocket handshake.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeQuery {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{0}")]
    MissingToken(String),
    #[error("JWT validation failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("Can't extract a UID from the JWT token")]
    MissingSubject,
    #[error("Missing userId on handshake")]
    MissingUserId,
}

// Get the auth token from the request headers
pub fn get_auth_token(headers: &HeaderMap) -> Result<String, IdentityError> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = headers.get(http::header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| IdentityError::MissingToken("Invalid Authorization header".to_string()))?;
        return Ok(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string());
    }

    // 2. Try to get token from cookies
    let cookie_header = headers
        .get(http::header::COOKIE)
        .ok_or_else(|| IdentityError::MissingToken("Missing Authorization header or Cookie".to_string()))?
        .to_str()
        .map_err(|_| IdentityError::MissingToken("Invalid Cookie header".to_string()))?;

    cookie::Cookie::split_parse(cookie_header)
        .flatten()
        .find(|c| c.name() == "auth_token")
        .map(|c| c.value().to_string())
        .ok_or_else(|| IdentityError::MissingToken("auth_token cookie not found".to_string()))
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

/// Work out who is on the other end of a new connection.
///
/// With a JWT secret configured the token is mandatory and its `sub` and
/// `name` claims are used. Without one, the claimed `userId`/`userName`
/// query parameters are taken at face value; vouching for them is the
/// job of whoever issued them.
pub fn resolve_identity(
    headers: &HeaderMap,
    query: &HandshakeQuery,
    jwt_secret: Option<&str>,
) -> Result<Identity, IdentityError> {
    let non_empty = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);

    if let Some(secret) = jwt_secret {
        let token = get_auth_token(headers)?;
        let token_data = validate_jwt(&token, secret)?;
        let claim = |key: &str| {
            token_data
                .claims
                .get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        let user_id = claim("sub").ok_or(IdentityError::MissingSubject)?;
        let user_name = claim("name")
            .or_else(|| non_empty(&query.user_name))
            .unwrap_or_else(|| user_id.clone());
        info!("JWT token validated successfully for user: {}", user_id);
        return Ok(Identity { user_id, user_name });
    }

    let user_id = non_empty(&query.user_id).ok_or(IdentityError::MissingUserId)?;
    let user_name = non_empty(&query.user_name).unwrap_or_else(|| user_id.clone());
    debug!("Accepted claimed identity {} ({})", user_id, user_name);
    Ok(Identity { user_id, user_name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token(claims: serde_json::Value) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn exp() -> i64 {
        chrono::Utc::now().timestamp() + 300
    }

    fn query(user_id: Option<&str>, user_name: Option<&str>) -> HandshakeQuery {
        HandshakeQuery {
            user_id: user_id.map(String::from),
            user_name: user_name.map(String::from),
        }
    }

    #[test]
    fn claimed_identity_comes_from_the_query() {
        let identity = resolve_identity(&HeaderMap::new(), &query(Some("u1"), Some("Alice")), None).unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.user_name, "Alice");

        let identity = resolve_identity(&HeaderMap::new(), &query(Some("u1"), Some("  ")), None).unwrap();
        assert_eq!(identity.user_name, "u1");

        let err = resolve_identity(&HeaderMap::new(), &query(None, Some("Alice")), None).unwrap_err();
        assert!(matches!(err, IdentityError::MissingUserId));
    }

    #[test]
    fn bearer_token_identity() {
        let mut headers = HeaderMap::new();
        let jwt = token(json!({"sub": "u42", "name": "Grace", "exp": exp()}));
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {jwt}")).unwrap());

        let identity = resolve_identity(&headers, &query(Some("spoofed"), None), Some(SECRET)).unwrap();
        assert_eq!(identity.user_id, "u42");
        assert_eq!(identity.user_name, "Grace");
    }

    #[test]
    fn cookie_token_identity_falls_back_to_query_name() {
        let mut headers = HeaderMap::new();
        let jwt = token(json!({"sub": "u7", "exp": exp()}));
        headers.insert(http::header::COOKIE, HeaderValue::from_str(&format!("theme=dark; auth_token={jwt}")).unwrap());

        let identity = resolve_identity(&headers, &query(None, Some("Ada")), Some(SECRET)).unwrap();
        assert_eq!(identity.user_id, "u7");
        assert_eq!(identity.user_name, "Ada");
    }

    #[test]
    fn token_is_required_once_a_secret_is_configured() {
        let err = resolve_identity(&HeaderMap::new(), &query(Some("u1"), None), Some(SECRET)).unwrap_err();
        assert!(matches!(err, IdentityError::MissingToken(_)));

        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer not-a-jwt"));
        let err = resolve_identity(&headers, &query(Some("u1"), None), Some(SECRET)).unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken(_)));

        let mut headers = HeaderMap::new();
        let jwt = token(json!({"name": "Nobody", "exp": exp()}));
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {jwt}")).unwrap());
        let err = resolve_identity(&headers, &query(None, None), Some(SECRET)).unwrap_err();
        assert!(matches!(err, IdentityError::MissingSubject));
    }
}

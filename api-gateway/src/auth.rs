//! Bearer-JWT authentication for the HTTP surface.
//!
//! Tokens are HS256 over a custom claim set carrying the caller's address
//! and role name; they expire after ten minutes. Handlers call
//! [`authenticate`] with the request headers and get the verified claims
//! back, or a ready-to-return error response.

use axum::http::{HeaderMap, StatusCode, header};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::routes::{ApiError, api_error};

const ISSUER: &str = "docledger";
const AUDIENCE: &str = "docledger user";
const TOKEN_LIFETIME_SECS: i64 = 600;

/// Customized claims on top of the registered JWT claim names.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "roleName")]
    pub role_name: String,
    pub address: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role_name == "admin"
    }
}

/// Issues a token for an authenticated address.
pub fn issue_token(
    address: &str,
    role_name: &str,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        role_name: role_name.to_string(),
        address: address.to_string(),
        iat: now,
        exp: now + TOKEN_LIFETIME_SECS,
        iss: ISSUER.to_string(),
        aud: AUDIENCE.to_string(),
    };
    encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verifies a token and returns its claims.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[AUDIENCE]);
    validation.set_issuer(&[ISSUER]);

    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => Ok(data.claims),
        Err(e) => match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature
            | jsonwebtoken::errors::ErrorKind::ImmatureSignature => {
                Err("token expired".to_string())
            }
            _ => Err("cannot validate the token".to_string()),
        },
    }
}

/// Extracts and verifies the bearer token; optionally requires the admin
/// role. Returns the claims, or the error response to send back.
pub fn authenticate(
    headers: &HeaderMap,
    require_admin: bool,
    secret: &str,
) -> Result<Claims, ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "missing authorization header",
        ));
    };
    let token = value
        .to_str()
        .unwrap_or_default()
        .trim_start_matches("Bearer ")
        .trim();

    let claims = verify_token(token, secret)
        .map_err(|message| api_error(StatusCode::UNAUTHORIZED, message))?;

    if require_admin && !claims.is_admin() {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "insufficient permission",
        ));
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_and_verify_roundtrip() {
        let token = issue_token("0xabc", "user", "s3cret").unwrap();
        let claims = verify_token(&token, "s3cret").unwrap();
        assert_eq!(claims.address, "0xabc");
        assert_eq!(claims.role_name, "user");
        assert!(!claims.is_admin());
        assert_eq!(claims.exp - claims.iat, TOKEN_LIFETIME_SECS);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("0xabc", "user", "s3cret").unwrap();
        assert_eq!(
            verify_token(&token, "other").unwrap_err(),
            "cannot validate the token"
        );
    }

    #[test]
    fn admin_requirement() {
        let mut headers = HeaderMap::new();
        let token = issue_token("0xabc", "user", "s3cret").unwrap();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );

        assert!(authenticate(&headers, false, "s3cret").is_ok());
        assert!(authenticate(&headers, true, "s3cret").is_err());

        let admin_token = issue_token("0xabc", "admin", "s3cret").unwrap();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {admin_token}").parse().unwrap(),
        );
        assert!(authenticate(&headers, true, "s3cret").is_ok());
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let headers = HeaderMap::new();
        assert!(authenticate(&headers, false, "s3cret").is_err());
    }
}

use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{FromRequest, HttpRequest, HttpResponse, ResponseError};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use paperclip::actix::Apiv2Security;
use serde::{Deserialize, Serialize};

pub const ROLE_STUDENT: &str = "etudiant";
pub const ROLE_ADMIN: &str = "admin";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization token")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Insufficient privileges")]
    Forbidden,

    #[error("Token configuration not registered")]
    MissingConfig,

    #[error("Failed to issue token: {0}")]
    IssueFailure(#[from] jsonwebtoken::errors::Error),
}

impl ResponseError for AuthError {
    fn error_response(&self) -> HttpResponse {
        match self {
            AuthError::MissingToken | AuthError::InvalidToken => {
                HttpResponse::Unauthorized().json(self.to_string())
            }
            AuthError::Forbidden => HttpResponse::Forbidden().json(self.to_string()),
            AuthError::MissingConfig | AuthError::IssueFailure(_) => {
                tracing::error!("Auth failure {}", self);
                HttpResponse::InternalServerError().finish()
            }
        }
    }
}

/// Token signing configuration, registered as app data by each service
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub validity_hours: i64,
}

impl TokenConfig {
    pub fn from_env() -> Self {
        Self {
            secret: std::env::var("TOKEN_SECRET").unwrap_or("biblioservice-dev-secret".to_string()),
            validity_hours: std::env::var("TOKEN_VALIDITY_HOURS")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(24),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub user_id: i32,
    pub username: String,
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// True if the token belongs to the given user or to an admin
    pub fn allows_access_to(&self, user_id: i32) -> bool {
        self.user_id == user_id || self.is_admin()
    }
}

pub fn issue_token(
    user_id: i32,
    username: &str,
    role: &str,
    config: &TokenConfig,
) -> Result<String, AuthError> {
    let exp = (chrono::Utc::now() + chrono::Duration::hours(config.validity_hours)).timestamp();

    let claims = Claims {
        user_id,
        username: username.to_string(),
        role: role.to_string(),
        exp: exp as usize,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?)
}

pub fn decode_token(token: &str, config: &TokenConfig) -> Result<Claims, AuthError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|_| AuthError::InvalidToken)
}

fn claims_from_request(req: &HttpRequest) -> Result<Claims, AuthError> {
    let config = req
        .app_data::<actix_web::web::Data<TokenConfig>>()
        .ok_or(AuthError::MissingConfig)?;

    let header_value = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = header_value.strip_prefix("Bearer ").unwrap_or(header_value);

    decode_token(token, config)
}

/// Extractor for endpoints available to any logged in user
#[derive(Apiv2Security)]
#[openapi(apiKey, in = "header", name = "Authorization")]
pub struct AuthenticatedUser(pub Claims);

impl FromRequest for AuthenticatedUser {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(claims_from_request(req).map(AuthenticatedUser))
    }
}

/// Extractor for endpoints restricted to the admin role
#[derive(Apiv2Security)]
#[openapi(apiKey, in = "header", name = "Authorization")]
pub struct AdminAccess(pub Claims);

impl FromRequest for AdminAccess {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(claims_from_request(req).and_then(|claims| {
            if claims.is_admin() {
                Ok(AdminAccess(claims))
            } else {
                Err(AuthError::Forbidden)
            }
        }))
    }
}

#[cfg(test)]
mod token_tests {
    use super::*;

    fn test_config() -> TokenConfig {
        TokenConfig {
            secret: "test-secret".to_string(),
            validity_hours: 1,
        }
    }

    #[test]
    /// Issues a token and decodes it back, checking the claims survive the round trip
    fn test_issue_and_decode_token() {
        let config = test_config();

        let token = issue_token(42, "amelie", ROLE_STUDENT, &config).expect("Failed to issue");

        let claims = decode_token(&token, &config).expect("Failed to decode");
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.username, "amelie");
        assert_eq!(claims.role, ROLE_STUDENT);
        assert!(!claims.is_admin());
        assert!(claims.allows_access_to(42));
        assert!(!claims.allows_access_to(43));
    }

    #[test]
    /// A token signed with a different secret is rejected
    fn test_wrong_secret_rejected() {
        let config = test_config();
        let other_config = TokenConfig {
            secret: "other-secret".to_string(),
            validity_hours: 1,
        };

        let token = issue_token(1, "user", ROLE_STUDENT, &config).expect("Failed to issue");

        let result = decode_token(&token, &other_config);
        assert!(matches!(result, Err(AuthError::InvalidToken)));
    }

    #[test]
    /// A token past its expiry is rejected
    fn test_expired_token_rejected() {
        let config = test_config();

        let exp = (chrono::Utc::now() - chrono::Duration::hours(2)).timestamp();
        let claims = Claims {
            user_id: 1,
            username: "user".to_string(),
            role: ROLE_STUDENT.to_string(),
            exp: exp as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .expect("Failed to encode");

        let result = decode_token(&token, &config);
        assert!(matches!(result, Err(AuthError::InvalidToken)));
    }

    #[test]
    /// Admin role grants access to any user id
    fn test_admin_access() {
        let config = test_config();
        let token = issue_token(7, "root", ROLE_ADMIN, &config).expect("Failed to issue");
        let claims = decode_token(&token, &config).expect("Failed to decode");

        assert!(claims.is_admin());
        assert!(claims.allows_access_to(7));
        assert!(claims.allows_access_to(1234));
    }
}

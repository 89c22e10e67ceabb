use thiserror::Error;

/// OAuth 2.0 error codes as they appear on the wire (RFC 6749 section 5.2,
/// RFC 6750 section 3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    AccessDenied,
    UnsupportedResponseType,
    ServerError,
    TemporarilyUnavailable,
    InvalidToken,
    InsufficientScope,
}

impl OAuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthErrorCode::InvalidRequest => "invalid_request",
            OAuthErrorCode::InvalidClient => "invalid_client",
            OAuthErrorCode::InvalidGrant => "invalid_grant",
            OAuthErrorCode::UnauthorizedClient => "unauthorized_client",
            OAuthErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            OAuthErrorCode::InvalidScope => "invalid_scope",
            OAuthErrorCode::AccessDenied => "access_denied",
            OAuthErrorCode::UnsupportedResponseType => "unsupported_response_type",
            OAuthErrorCode::ServerError => "server_error",
            OAuthErrorCode::TemporarilyUnavailable => "temporarily_unavailable",
            OAuthErrorCode::InvalidToken => "invalid_token",
            OAuthErrorCode::InsufficientScope => "insufficient_scope",
        }
    }

    /// HTTP status this code maps to. `invalid_client`, `invalid_token` and
    /// `insufficient_scope` additionally carry a `WWW-Authenticate` header;
    /// see `http::to_wire`.
    pub fn status(&self) -> u16 {
        match self {
            OAuthErrorCode::InvalidClient
            | OAuthErrorCode::InvalidToken
            | OAuthErrorCode::InsufficientScope => 401,
            OAuthErrorCode::ServerError => 500,
            OAuthErrorCode::TemporarilyUnavailable => 503,
            _ => 400,
        }
    }
}

/// Errors surfaced by the `Store` port.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store failure: {0}")]
    Internal(String),
}

/// Errors produced by the crypto provider.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("crypto failure: {0}")]
    Failure(String),

    #[error("unknown key id: {0}")]
    KeyNotFound(String),

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("token malformed")]
    TokenMalformed,

    #[error("token outside its validity window")]
    TokenExpired,
}

/// A common error type for the service layer.
///
/// Errors travel as typed values through the core; only the HTTP adapter
/// translates them to the wire form via `http::to_wire`. Internal detail
/// (store messages, crypto causes) is logged there, never returned.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("invalid client: {0}")]
    InvalidClient(String),

    #[error("unauthorized client: {0}")]
    UnauthorizedClient(String),

    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("unsupported response type: {0}")]
    UnsupportedResponseType(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("insufficient scope: {0}")]
    InsufficientScope(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl ServiceError {
    /// The OAuth error code this error surfaces as.
    ///
    /// `Store` and `Crypto` leftovers that no service translated into a
    /// domain error are internal failures by definition.
    pub fn oauth_code(&self) -> OAuthErrorCode {
        match self {
            ServiceError::Validation(_) => OAuthErrorCode::InvalidRequest,
            ServiceError::InvalidClient(_) => OAuthErrorCode::InvalidClient,
            ServiceError::UnauthorizedClient(_) => OAuthErrorCode::UnauthorizedClient,
            ServiceError::InvalidGrant(_) => OAuthErrorCode::InvalidGrant,
            ServiceError::UnsupportedGrantType(_) => OAuthErrorCode::UnsupportedGrantType,
            ServiceError::UnsupportedResponseType(_) => OAuthErrorCode::UnsupportedResponseType,
            ServiceError::InvalidScope(_) => OAuthErrorCode::InvalidScope,
            ServiceError::AccessDenied(_) => OAuthErrorCode::AccessDenied,
            ServiceError::InvalidToken(_) => OAuthErrorCode::InvalidToken,
            ServiceError::InsufficientScope(_) => OAuthErrorCode::InsufficientScope,
            ServiceError::Conflict(_) | ServiceError::Configuration(_) => {
                OAuthErrorCode::ServerError
            }
            ServiceError::Store(StoreError::Unavailable(_)) => {
                OAuthErrorCode::TemporarilyUnavailable
            }
            ServiceError::Store(_) | ServiceError::Crypto(_) => OAuthErrorCode::ServerError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_map() {
        assert_eq!(OAuthErrorCode::InvalidClient.status(), 401);
        assert_eq!(OAuthErrorCode::InvalidToken.status(), 401);
        assert_eq!(OAuthErrorCode::InsufficientScope.status(), 401);
        assert_eq!(OAuthErrorCode::InvalidGrant.status(), 400);
        assert_eq!(OAuthErrorCode::ServerError.status(), 500);
        assert_eq!(OAuthErrorCode::TemporarilyUnavailable.status(), 503);
    }

    #[test]
    fn test_store_errors_surface_as_server_side() {
        let err = ServiceError::Store(StoreError::Internal("driver exploded".into()));
        assert_eq!(err.oauth_code(), OAuthErrorCode::ServerError);

        let err = ServiceError::Store(StoreError::Unavailable("replica lag".into()));
        assert_eq!(err.oauth_code(), OAuthErrorCode::TemporarilyUnavailable);
    }

    #[test]
    fn test_crypto_errors_surface_as_server_error() {
        let err = ServiceError::Crypto(CryptoError::KeyNotFound("kid-1".into()));
        assert_eq!(err.oauth_code(), OAuthErrorCode::ServerError);
    }
}

//! OAuth validation utilities
//!
//! Validation functions for OAuth 2.0 parameters: redirect URI handling,
//! scope parsing and subset enforcement, and format hygiene checks.

use crate::error::ServiceError;
use std::collections::HashSet;
use url::Url;

/// Checks a redirect URI from an authorization or token request against the
/// registered set.
///
/// Membership is exact string comparison: no normalization, no prefix
/// match, no wildcard. Anything looser reopens open-redirect attacks.
/// Registered URIs had their host lower-cased at registration time
/// (`normalize_registered_redirect_uri`); the comparison itself is raw.
pub fn validate_redirect_uri(
    redirect_uri: &str,
    registered_uris: &[String],
) -> Result<(), ServiceError> {
    if !registered_uris.iter().any(|uri| uri == redirect_uri) {
        return Err(ServiceError::Validation(
            "Redirect URI not registered for this client".to_string(),
        ));
    }

    Ok(())
}

/// Normalizes a redirect URI for storage at client registration time.
///
/// Lower-cases the host (scheme and host are case-insensitive per RFC 3986;
/// path and query are not touched) and rejects fragments, so the raw
/// comparison at request time cannot be defeated by case games.
pub fn normalize_registered_redirect_uri(uri: &str) -> Result<String, ServiceError> {
    let parsed = Url::parse(uri)
        .map_err(|e| ServiceError::Validation(format!("Invalid redirect URI format: {e}")))?;

    if parsed.fragment().is_some() {
        return Err(ServiceError::Validation(
            "Redirect URI must not contain fragment identifier".to_string(),
        ));
    }
    if parsed.cannot_be_a_base() {
        return Err(ServiceError::Validation(
            "Redirect URI must be an absolute hierarchical URI".to_string(),
        ));
    }

    // Url::parse already lower-cases scheme and host; re-serializing is the
    // normalization
    Ok(parsed.to_string())
}

/// Validates a requested scope string against the client's allowed set.
pub fn validate_scope(scope: &str, allowed_scopes: &[String]) -> Result<(), ServiceError> {
    for requested in scope.split_whitespace() {
        if !allowed_scopes.iter().any(|s| s == requested) {
            return Err(ServiceError::InvalidScope(format!(
                "Requested scope '{requested}' is not allowed for this client"
            )));
        }
    }

    Ok(())
}

/// Enforces that scopes in the token request are a subset of the original
/// authorization request. A token request must never expand scope.
pub fn enforce_scope_match(
    auth_scope: &str,
    token_scope: Option<&str>,
) -> Result<(), ServiceError> {
    let requested = token_scope.unwrap_or(auth_scope);

    let authorized: HashSet<&str> = auth_scope.split_whitespace().collect();
    let requested_set: HashSet<&str> = requested.split_whitespace().collect();

    if !requested_set.is_subset(&authorized) {
        let unauthorized: Vec<&str> = requested_set.difference(&authorized).copied().collect();
        return Err(ServiceError::InvalidScope(format!(
            "Token request attempts to expand scope beyond authorization. Unauthorized scopes: {}",
            unauthorized.join(", ")
        )));
    }

    Ok(())
}

/// Parses scope string into a Vec of individual scopes.
pub fn parse_scopes(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(|s| s.to_string()).collect()
}

/// Whether a space-delimited scope string contains the given label.
pub fn scope_contains(scope: &str, label: &str) -> bool {
    scope.split_whitespace().any(|s| s == label)
}

/// Validates client_id format.
///
/// Client IDs should only contain alphanumeric characters, hyphens,
/// underscores and dots.
pub fn validate_client_id(client_id: &str) -> Result<(), ServiceError> {
    if client_id.is_empty() {
        return Err(ServiceError::Validation(
            "client_id cannot be empty".to_string(),
        ));
    }

    if client_id.len() > 128 {
        return Err(ServiceError::Validation(
            "client_id exceeds maximum length of 128 characters".to_string(),
        ));
    }

    if !client_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ServiceError::Validation(
            "client_id contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

/// Validates authorization code format. Codes are unpadded base64url, so
/// only alphanumerics, hyphen and underscore appear.
pub fn validate_auth_code(code: &str) -> Result<(), ServiceError> {
    if code.is_empty() {
        return Err(ServiceError::Validation(
            "Authorization code cannot be empty".to_string(),
        ));
    }

    if code.len() > 256 {
        return Err(ServiceError::Validation(
            "Authorization code exceeds maximum length".to_string(),
        ));
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ServiceError::Validation(
            "Authorization code contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

/// Validates code_verifier format according to RFC 7636 (PKCE).
///
/// Requirements:
/// - Length: 43-128 characters
/// - Characters: [A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"
pub fn validate_code_verifier(verifier: &str) -> Result<(), ServiceError> {
    if verifier.len() < 43 || verifier.len() > 128 {
        return Err(ServiceError::Validation(
            "code_verifier must be between 43 and 128 characters".to_string(),
        ));
    }

    if !verifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '~')
    {
        return Err(ServiceError::Validation(
            "code_verifier contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

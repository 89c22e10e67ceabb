//! Wire mapping for the HTTP adapter.
//!
//! The core never speaks HTTP itself; this module is the single place where
//! typed errors become the RFC 6749/6750 wire shape. The adapter takes a
//! [`WireError`] and writes status, headers and JSON body as-is.

use crate::error::{OAuthErrorCode, ServiceError};
use serde::Serialize;

/// Headers every token response must carry (RFC 6749 section 5.1).
pub const TOKEN_RESPONSE_HEADERS: [(&str, &str); 2] =
    [("Cache-Control", "no-store"), ("Pragma", "no-cache")];

/// OAuth error JSON body.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

/// A fully mapped error response.
#[derive(Debug, Clone, PartialEq)]
pub struct WireError {
    pub status: u16,
    pub www_authenticate: Option<String>,
    pub body: ErrorBody,
}

/// Maps a service error to its wire form.
///
/// Internal failures keep their detail in the log and surface a generic
/// description; everything else echoes its message, which services phrase
/// for clients.
pub fn to_wire(err: &ServiceError) -> WireError {
    let code = err.oauth_code();

    let description = match code {
        OAuthErrorCode::ServerError => {
            tracing::error!(error = %err, "internal error surfaced to client");
            "An internal error occurred. Please try again later.".to_string()
        }
        OAuthErrorCode::TemporarilyUnavailable => {
            tracing::error!(error = %err, "store unavailable");
            "The service is temporarily unavailable. Please try again later.".to_string()
        }
        _ => err.to_string(),
    };

    let www_authenticate = match code {
        OAuthErrorCode::InvalidClient => Some("Basic realm=\"oauth\"".to_string()),
        OAuthErrorCode::InvalidToken | OAuthErrorCode::InsufficientScope => Some(format!(
            "Bearer error=\"{}\", error_description=\"{}\"",
            code.as_str(),
            description.replace('"', "'")
        )),
        _ => None,
    };

    WireError {
        status: code.status(),
        www_authenticate,
        body: ErrorBody {
            error: code.as_str(),
            error_description: Some(description),
            error_uri: None,
        },
    }
}

/// Appends an OAuth error to a known-good redirect URI, echoing `state`
/// verbatim when present.
///
/// Never call this before the redirect URI passed registration validation;
/// the open-redirect guard in the orchestrator depends on it.
pub fn redirect_error_url(
    redirect_uri: &str,
    code: OAuthErrorCode,
    description: &str,
    state: Option<&str>,
) -> Result<String, ServiceError> {
    let mut url = url::Url::parse(redirect_uri)
        .map_err(|e| ServiceError::Validation(format!("unparseable redirect URI: {e}")))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("error", code.as_str());
        pairs.append_pair("error_description", description);
        if let Some(state) = state {
            pairs.append_pair("state", state);
        }
    }
    Ok(url.to_string())
}

/// Appends an authorization code to a known-good redirect URI, echoing
/// `state` verbatim when present.
pub fn redirect_success_url(
    redirect_uri: &str,
    code: &str,
    state: Option<&str>,
) -> Result<String, ServiceError> {
    let mut url = url::Url::parse(redirect_uri)
        .map_err(|e| ServiceError::Validation(format!("unparseable redirect URI: {e}")))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("code", code);
        if let Some(state) = state {
            pairs.append_pair("state", state);
        }
    }
    Ok(url.to_string())
}

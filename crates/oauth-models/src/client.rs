use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Enum for OAuth client types, mirroring the database schema.
///
/// A `CONFIDENTIAL` client can keep a secret (server-side deployment) and
/// carries a `client_secret_hash`. A `PUBLIC` client (SPA, mobile) cannot,
/// and must bind its authorization codes with PKCE instead.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)]
pub enum ClientType {
    PUBLIC,
    CONFIDENTIAL,
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClientType::PUBLIC => write!(f, "PUBLIC"),
            ClientType::CONFIDENTIAL => write!(f, "CONFIDENTIAL"),
        }
    }
}

/// Represents a registered OAuth2 client from the `oauth_clients` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Client {
    pub id: Uuid,
    /// Public client identifier presented on the wire.
    pub client_id: String,
    /// Password-style hash of the client secret; `None` for public clients.
    pub client_secret_hash: Option<String>,
    pub name: String,
    pub client_type: ClientType,
    /// Registered redirect URIs. Semantically a set; membership tests are
    /// exact string comparison. Hosts are lower-cased at registration time.
    pub redirect_uris: Vec<String>,
    /// Scope vocabulary this client is allowed to request.
    pub allowed_scopes: Vec<String>,
    /// JWKS endpoint for `private_key_jwt` client authentication.
    pub jwks_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    /// Joins the redirect URI set into the stored column form.
    ///
    /// The relational schema keeps `redirect_uris` as a single
    /// space-delimited column; the split/join pair preserves that wire
    /// compatibility while the rest of the code treats it as a set.
    pub fn join_redirect_uris(uris: &[String]) -> String {
        uris.join(" ")
    }

    /// Splits the stored column form back into the redirect URI set.
    pub fn split_redirect_uris(stored: &str) -> Vec<String> {
        stored
            .split_whitespace()
            .map(|s| s.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_uri_stored_form_round_trip() {
        let uris = vec![
            "https://app.example.com/cb".to_string(),
            "https://app.example.com/cb2".to_string(),
        ];
        let stored = Client::join_redirect_uris(&uris);
        assert_eq!(Client::split_redirect_uris(&stored), uris);
    }

    #[test]
    fn test_client_type_display() {
        assert_eq!(ClientType::PUBLIC.to_string(), "PUBLIC");
        assert_eq!(ClientType::CONFIDENTIAL.to_string(), "CONFIDENTIAL");
    }
}

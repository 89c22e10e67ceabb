use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// PKCE code challenge transformation (RFC 7636 section 4.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    #[serde(rename = "plain")]
    Plain,
    #[serde(rename = "S256")]
    S256,
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodeChallengeMethod::Plain => write!(f, "plain"),
            CodeChallengeMethod::S256 => write!(f, "S256"),
        }
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(CodeChallengeMethod::Plain),
            "S256" => Ok(CodeChallengeMethod::S256),
            _ => Err(()),
        }
    }
}

/// Represents an authorization code stored in the database, mapping to the
/// `authorization_codes` table.
///
/// Single-use: the row is created at `/authorize` and deleted at first
/// redemption (or by the expiry sweep). An unexpired row therefore has
/// never been redeemed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationCode {
    pub id: Uuid,
    pub code: String,
    pub client_id: Uuid,
    pub redirect_uri: String,
    pub user_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    /// OpenID Connect replay-protection nonce, echoed into the ID token.
    pub nonce: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

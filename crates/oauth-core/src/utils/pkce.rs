use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use oauth_models::CodeChallengeMethod;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum PkceError {
    #[error("PKCE verification failed: code challenge does not match verifier")]
    VerificationFailed,
}

/// Verifies a PKCE code challenge against a code verifier.
///
/// # Arguments
///
/// * `code_verifier` - The plain-text code verifier from the client.
/// * `code_challenge` - The stored challenge from the authorization request.
/// * `method` - The transformation registered with the challenge.
///
/// # Returns
///
/// `Ok(())` if the verification is successful, otherwise a `PkceError`.
pub fn verify_pkce(
    code_verifier: &str,
    code_challenge: &str,
    method: CodeChallengeMethod,
) -> Result<(), PkceError> {
    let derived = match method {
        CodeChallengeMethod::Plain => code_verifier.to_string(),
        CodeChallengeMethod::S256 => {
            let mut hasher = Sha256::new();
            hasher.update(code_verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(hasher.finalize())
        }
    };

    if derived != code_challenge {
        return Err(PkceError::VerificationFailed);
    }

    Ok(())
}

/// Generates a random PKCE code verifier (43-128 characters).
/// The verifier is a cryptographically random string using unreserved characters.
pub fn generate_code_verifier() -> String {
    let mut rng = thread_rng();
    let length = rng.gen_range(43..=128);
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Generates an S256 PKCE code challenge from a code verifier.
/// This is mainly useful for testing purposes.
pub fn generate_code_challenge(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

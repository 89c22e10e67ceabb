use crate::config::{PasswordAlgorithm, PasswordHashConfig};
use crate::error::CryptoError;
use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2, Params,
};

fn argon2_for(config: &PasswordHashConfig) -> Result<Argon2<'static>, CryptoError> {
    let params = Params::new(
        Params::DEFAULT_M_COST,
        config.cost.max(1),
        Params::DEFAULT_P_COST,
        None,
    )
    .map_err(|e| CryptoError::Failure(e.to_string()))?;
    Ok(Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        params,
    ))
}

/// Hashes a password with the configured algorithm and cost.
pub fn hash_password(password: &str, config: &PasswordHashConfig) -> Result<String, CryptoError> {
    match config.algorithm {
        PasswordAlgorithm::Argon2id => {
            let mut salt_bytes = vec![0u8; config.salt_length];
            OsRng.fill_bytes(&mut salt_bytes);
            let salt = SaltString::encode_b64(&salt_bytes)
                .map_err(|e| CryptoError::Failure(e.to_string()))?;

            let argon2 = argon2_for(config)?;
            let password_hash = argon2
                .hash_password(password.as_bytes(), &salt)
                .map_err(|e| CryptoError::Failure(e.to_string()))?;

            Ok(password_hash.to_string())
        }
        PasswordAlgorithm::Bcrypt => {
            // bcrypt only accepts 4..=31 rounds; the argon2-oriented default
            // cost falls back to the library default
            let cost = if (4..=31).contains(&config.cost) {
                config.cost
            } else {
                bcrypt::DEFAULT_COST
            };
            bcrypt::hash(password, cost).map_err(|e| CryptoError::Failure(e.to_string()))
        }
    }
}

/// Verifies a password against either a bcrypt or Argon2 hash.
/// Automatically detects the hash format and uses the appropriate algorithm;
/// both libraries compare in constant time.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, CryptoError> {
    if hash.starts_with("$2a$") || hash.starts_with("$2b$") || hash.starts_with("$2y$") {
        bcrypt::verify(password, hash)
            .map_err(|e| CryptoError::Failure(format!("bcrypt verification error: {e}")))
    } else if hash.starts_with("$argon2") {
        let parsed_hash =
            PasswordHash::new(hash).map_err(|e| CryptoError::Failure(e.to_string()))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    } else {
        Err(CryptoError::Failure(
            "Unknown hash format. Expected bcrypt ($2a$/$2b$/$2y$) or Argon2 ($argon2)".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hashing_and_verification() {
        let config = PasswordHashConfig::default();
        let password = "mySecurePassword123";

        let hash = hash_password(password, &config).unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(password, &hash).unwrap());
    }

    #[test]
    fn test_incorrect_password_verification() {
        let config = PasswordHashConfig::default();
        let hash = hash_password("mySecurePassword123", &config).unwrap();

        assert!(!verify_password("wrongPassword", &hash).unwrap());
    }

    #[test]
    fn test_bcrypt_hashing_and_verification() {
        let config = PasswordHashConfig {
            algorithm: PasswordAlgorithm::Bcrypt,
            cost: 4, // keep the test fast
            ..PasswordHashConfig::default()
        };
        let hash = hash_password("hunter2hunter2", &config).unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("hunter2hunter2", &hash).unwrap());
        assert!(!verify_password("hunter3hunter3", &hash).unwrap());
    }

    #[test]
    fn test_invalid_hash_verification() {
        let result = verify_password("password", "this_is_not_a_valid_hash");
        assert!(result.is_err());
    }
}

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand_core::OsRng;

use crate::error::{Error, Result};

/// Hashes a PIN with Argon2id into a PHC string.
pub fn hash_pin(pin: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("failed to hash pin: {e}")))
}

/// Checks a PIN against a stored hash. Accounts without a PIN, or with a
/// hash that does not parse, never verify.
pub fn verify_pin(stored: Option<&str>, pin: &str) -> bool {
    let Some(parsed) = stored.and_then(|s| PasswordHash::new(s).ok()) else {
        return false;
    };
    Argon2::default().verify_password(pin.as_bytes(), &parsed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_matching_pin_only() {
        let stored = hash_pin("1234").unwrap();
        assert!(verify_pin(Some(&stored), "1234"));
        assert!(!verify_pin(Some(&stored), "4321"));
        assert!(!verify_pin(None, "1234"));
        assert!(!verify_pin(Some("garbage"), "1234"));
    }

    #[test]
    fn hashes_are_salted_argon2id() {
        let first = hash_pin("1234").unwrap();
        let second = hash_pin("1234").unwrap();
        assert!(first.starts_with("$argon2id$"));
        assert_ne!(first, second);
        assert!(!first.contains("1234"));
    }
}

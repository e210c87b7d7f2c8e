use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::{HANDLE_PREFIX, HANDLE_SUFFIX_LEN, VERIFICATION_CODE_LEN};

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Genere un ID unique pour une organisation (UUID v4 hex, 32 chars)
pub fn organization_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Genere un ID unique pour une annonce (UUID v4 hex, 32 chars)
pub fn listing_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Genere un ID unique pour un message (UUID v4 hex, 32 chars)
pub fn message_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Random base36 characters drawn from a fresh UUID v4.
fn base36_chars(len: usize) -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(len)
        .map(|b| BASE36[(*b as usize) % BASE36.len()] as char)
        .collect()
}

/// Public pseudonymous handle, e.g. `member_k3x9a`.
/// Uniqueness is enforced by the directory table, not here.
pub fn pseudonymous_handle() -> String {
    format!("{}{}", HANDLE_PREFIX, base36_chars(HANDLE_SUFFIX_LEN))
}

/// Short uppercase code mailed to the organization at registration.
pub fn verification_code() -> String {
    base36_chars(VERIFICATION_CODE_LEN).to_uppercase()
}

/// SHA-256 hex digest of a verification code; only the digest is stored.
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().to_uppercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = listing_id();
        let b = listing_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_handle_shape() {
        let h = pseudonymous_handle();
        assert!(h.starts_with(HANDLE_PREFIX));
        assert_eq!(h.len(), HANDLE_PREFIX.len() + HANDLE_SUFFIX_LEN);
        assert!(h[HANDLE_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_hash_code_normalizes_case() {
        let code = verification_code();
        assert_eq!(code.len(), VERIFICATION_CODE_LEN);
        assert_eq!(hash_code(&code), hash_code(&code.to_lowercase()));
        assert_ne!(hash_code("ABC123"), hash_code("ABC124"));
    }
}

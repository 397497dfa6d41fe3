//! Password-based key derivation
//!
//! Every file gets a fresh random salt, so every file gets its own key even
//! when the same password is used for a whole batch. Derivation is never
//! cached across files.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of derived key in bytes
pub const KEY_LEN: usize = 32;

/// PBKDF2-HMAC-SHA256 iteration count
pub const PBKDF2_ITERATIONS: u32 = 200_000;

/// A derived 256-bit key, wiped from memory on drop.
pub type DerivedKey = Zeroizing<[u8; KEY_LEN]>;

/// Derive a 32-byte key from a password and salt.
///
/// Deterministic given `(password, salt)`; decryption relies on this to
/// reproduce the key from the salt stored in the file header.
pub fn derive_key(password: &[u8], salt: &[u8; SALT_LEN]) -> DerivedKey {
    derive_key_with_iterations(password, salt, PBKDF2_ITERATIONS)
}

pub(crate) fn derive_key_with_iterations(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> DerivedKey {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password, salt, iterations, key.as_mut());
    key
}

/// Generate a fresh random salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let salt = [7u8; SALT_LEN];
        let k1 = derive_key_with_iterations(b"password", &salt, 10);
        let k2 = derive_key_with_iterations(b"password", &salt, 10);
        assert_eq!(*k1, *k2);
    }

    #[test]
    fn test_salt_changes_key() {
        let k1 = derive_key_with_iterations(b"password", &[1u8; SALT_LEN], 10);
        let k2 = derive_key_with_iterations(b"password", &[2u8; SALT_LEN], 10);
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn test_password_changes_key() {
        let salt = [1u8; SALT_LEN];
        let k1 = derive_key_with_iterations(b"password", &salt, 10);
        let k2 = derive_key_with_iterations(b"passw0rd", &salt, 10);
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn test_rfc_vector_single_iteration() {
        // PBKDF2-HMAC-SHA256("password", "salt", 1, 32)
        let key = derive_key_with_iterations(b"password", b"salt", 1);
        let expected: [u8; KEY_LEN] = [
            0x12, 0x0f, 0xb6, 0xcf, 0xfc, 0xf8, 0xb3, 0x2c, 0x43, 0xe7, 0x22, 0x52, 0x56, 0xc4,
            0xf8, 0x37, 0xa8, 0x65, 0x48, 0xc9, 0x2c, 0xcc, 0x35, 0x48, 0x08, 0x05, 0x98, 0x7c,
            0xb7, 0x0b, 0xe1, 0x7b,
        ];
        assert_eq!(*key, expected);
    }

    #[test]
    fn test_full_iteration_count_is_deterministic() {
        let salt = generate_salt();
        assert_eq!(*derive_key(b"pw", &salt), *derive_key(b"pw", &salt));
    }

    #[test]
    fn test_generated_salts_differ() {
        assert_ne!(generate_salt(), generate_salt());
    }
}

//! Password hashing
//!
//! New hashes are Argon2id (PHC string format). Accounts imported from the
//! legacy user store carry `pbkdf2_sha256$<iterations>$<salt>$<base64 hash>`
//! hashes; those verify here and are replaced with Argon2id after the next
//! successful login.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use data_encoding::BASE64;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const LEGACY_PREFIX: &str = "pbkdf2_sha256$";

/// Upper bound on the iteration count accepted from a stored legacy hash
pub const MAX_LEGACY_ITERATIONS: u32 = 1_000_000;

/// Hash a password using Argon2id with secure defaults.
///
/// ```ignore
/// let hash = hash_password("my_secure_password")?;
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
        .context("Password hashing failed")?;

    Ok(password_hash.to_string())
}

/// Verify a password against a stored hash of either supported format.
///
/// Returns `Ok(false)` for a wrong password and `Err` for a malformed hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    if is_legacy_hash(hash) {
        return verify_legacy_password(password, hash);
    }

    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))
        .context("Failed to parse password hash")?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e))
            .context("Password verification error"),
    }
}

/// Whether the hash should be upgraded to Argon2id
pub fn is_legacy_hash(hash: &str) -> bool {
    hash.starts_with(LEGACY_PREFIX)
}

fn verify_legacy_password(password: &str, hash: &str) -> Result<bool> {
    let mut parts = hash.splitn(4, '$');
    let (Some(_), Some(iterations), Some(salt), Some(expected)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        anyhow::bail!("Invalid legacy password hash format");
    };

    let iterations: u32 = iterations
        .parse()
        .context("Invalid iteration count in legacy password hash")?;
    if iterations == 0 || iterations > MAX_LEGACY_ITERATIONS {
        anyhow::bail!("Unsupported iteration count {iterations} in legacy password hash");
    }
    let expected = BASE64
        .decode(expected.as_bytes())
        .context("Invalid base64 digest in legacy password hash")?;
    if expected.is_empty() {
        anyhow::bail!("Empty digest in legacy password hash");
    }

    let derived = pbkdf2_hmac_sha256(password.as_bytes(), salt.as_bytes(), iterations, expected.len());
    Ok(derived.ct_eq(&expected).into())
}

/// Build a legacy-format hash. Only used to produce fixtures.
#[cfg(test)]
pub(crate) fn legacy_hash(password: &str, salt: &str, iterations: u32) -> String {
    let digest = pbkdf2_hmac_sha256(password.as_bytes(), salt.as_bytes(), iterations, 32);
    format!("{LEGACY_PREFIX}{iterations}${salt}${}", BASE64.encode(&digest))
}

fn pbkdf2_hmac_sha256(password: &[u8], salt: &[u8], iterations: u32, len: usize) -> Vec<u8> {
    let mut output = vec![0u8; len];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut output);
    output
}

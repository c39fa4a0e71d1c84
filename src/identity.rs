//! Instance identifier generation.

use rand::rngs::OsRng;
use rand::RngCore as _;
use sha2::{Digest as _, Sha256};

use crate::error::{AppError, Result};

const SALT_LEN: usize = 16;
/// Hex characters kept from the digest.
const ID_LEN: usize = 40;

/// Derive a new instance id from `name` and a fresh random salt.
///
/// Two calls with the same name yield different ids. The only failure is an
/// unavailable entropy source, which is not retried.
pub fn generate_instance_id(name: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| AppError::external(format!("Entropy source unavailable: {}", e)))?;
    Ok(derive_id(name, &salt))
}

fn derive_id(name: &str, salt: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hex::encode(salt).as_bytes());
    hasher.update(name.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(ID_LEN);
    id
}

/// Returns true if `id` has the shape produced by [`generate_instance_id`].
pub fn is_valid_instance_id(id: &str) -> bool {
    id.len() == ID_LEN && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

//! Fixed-size pre-digest applied before the adaptive hash.

use rand::RngCore;
use sha2::{Digest, Sha512};

/// SHA-512 of `input`, hex encoded (128 ASCII characters).
///
/// Normalizes passwords of any length to a bounded secret before they reach
/// the adaptive primitive.
pub fn pre_digest(input: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha512::new();
    hasher.update(input.as_ref());
    hex::encode(hasher.finalize())
}

/// Random secret used to build the fake digest.
pub(crate) fn random_password() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

//! Adaptive hashing primitive executed inside the worker.

use rand::RngCore;
use rand::rngs::OsRng;

/// Lowest work factor bcrypt accepts.
pub const MIN_COST: u32 = 4;
/// Highest work factor bcrypt accepts.
pub const MAX_COST: u32 = 31;

pub fn cost_in_range(cost: u32) -> bool {
    (MIN_COST..=MAX_COST).contains(&cost)
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct PrimitiveError {
    message: String,
}

impl PrimitiveError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<bcrypt::BcryptError> for PrimitiveError {
    fn from(e: bcrypt::BcryptError) -> Self {
        match e {
            // bcrypt echoes the whole stored digest in this message.
            bcrypt::BcryptError::InvalidHash(_) => Self::new("Invalid hash"),
            other => Self::new(other.to_string()),
        }
    }
}

/// Salted, adaptive password hash.
///
/// Implementations must be slow and salted; the worker process only ever
/// calls one of these operations per launch.
pub trait HashPrimitive: Send + Sync + 'static {
    type Salt: Send;

    fn gen_salt(&self, cost: u32) -> Result<Self::Salt, PrimitiveError>;

    fn hash_with_salt(&self, password: &[u8], salt: Self::Salt) -> Result<String, PrimitiveError>;

    fn verify(&self, password: &[u8], digest: &str) -> Result<bool, PrimitiveError>;
}

/// bcrypt ($2b$), salt drawn from the OS RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bcrypt;

#[derive(Debug, Clone, Copy)]
pub struct BcryptSalt {
    cost: u32,
    bytes: [u8; 16],
}

impl HashPrimitive for Bcrypt {
    type Salt = BcryptSalt;

    fn gen_salt(&self, cost: u32) -> Result<BcryptSalt, PrimitiveError> {
        if !cost_in_range(cost) {
            return Err(PrimitiveError::new(format!(
                "cost {} outside {}..={}",
                cost, MIN_COST, MAX_COST
            )));
        }
        let mut bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| PrimitiveError::new(format!("failed to generate salt: {}", e)))?;
        Ok(BcryptSalt { cost, bytes })
    }

    fn hash_with_salt(&self, password: &[u8], salt: BcryptSalt) -> Result<String, PrimitiveError> {
        let parts = bcrypt::hash_with_salt(password, salt.cost, salt.bytes)?;
        Ok(parts.format_for_version(bcrypt::Version::TwoB))
    }

    fn verify(&self, password: &[u8], digest: &str) -> Result<bool, PrimitiveError> {
        Ok(bcrypt::verify(password, digest)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcrypt_hash_and_verify() {
        let salt = Bcrypt.gen_salt(MIN_COST).unwrap();
        let digest = Bcrypt.hash_with_salt(b"correct horse", salt).unwrap();

        assert!(digest.starts_with("$2b$04$"));
        assert_eq!(digest.len(), 60);
        assert!(Bcrypt.verify(b"correct horse", &digest).unwrap());
        assert!(!Bcrypt.verify(b"wrong horse", &digest).unwrap());
    }

    #[test]
    fn bcrypt_salts_differ() {
        let a = Bcrypt
            .hash_with_salt(b"same", Bcrypt.gen_salt(MIN_COST).unwrap())
            .unwrap();
        let b = Bcrypt
            .hash_with_salt(b"same", Bcrypt.gen_salt(MIN_COST).unwrap())
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn bcrypt_rejects_out_of_range_cost() {
        let err = Bcrypt.gen_salt(3).unwrap_err();
        assert!(err.to_string().contains("cost 3"));
        assert!(Bcrypt.gen_salt(32).is_err());
    }

    #[test]
    fn bcrypt_verify_reports_invalid_digest() {
        let err = Bcrypt.verify(b"pw", "not-a-bcrypt-hash").unwrap_err();
        assert_eq!(err.to_string(), "Invalid hash");
        assert!(!err.to_string().contains("not-a-bcrypt-hash"));
    }

    #[test]
    fn cost_bounds() {
        assert!(cost_in_range(4));
        assert!(cost_in_range(31));
        assert!(!cost_in_range(0));
        assert!(!cost_in_range(32));
    }
}

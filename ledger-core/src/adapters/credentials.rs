//! Argon2id credential hasher
//!
//! Hashes are PHC strings (`$argon2id$v=19$m=...`), so the cost parameters
//! travel with each hash and verification keeps working after the
//! configured costs change.

use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Version};
use rand::Rng;

use crate::config::Argon2Params;
use crate::domain::{Error, Result};
use crate::ports::CredentialHasher;

/// Salt length in bytes
const SALT_LEN: usize = 16;

pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    pub fn new(params: &Argon2Params) -> Result<Self> {
        let argon2_params = argon2::Params::new(
            params.memory_cost,
            params.time_cost,
            params.parallelism,
            Some(params.hash_len as usize),
        )
        .map_err(|e| Error::config(format!("Invalid argon2 params: {}", e)))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params),
        })
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plain: &str) -> Result<String> {
        let salt: [u8; SALT_LEN] = rand::thread_rng().gen();
        let salt = SaltString::encode_b64(&salt)
            .map_err(|e| Error::validation(format!("Failed to encode salt: {}", e)))?;

        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| Error::validation(format!("Failed to hash password: {}", e)))?;
        Ok(hash.to_string())
    }

    fn compare(&self, hash: &str, candidate: &str) -> Result<()> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| Error::validation(format!("Malformed credential hash: {}", e)))?;

        match self.argon2.verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => Ok(()),
            Err(password_hash::Error::Password) => Err(Error::UnmatchedPassword),
            Err(e) => Err(Error::validation(format!("Failed to verify password: {}", e))),
        }
    }
}

//! Credential port - password hashing and comparison

use crate::domain::Result;

/// Produces and checks opaque credential hashes
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, plain: &str) -> Result<String>;

    /// Fails with `UnmatchedPassword` when `candidate` does not match
    fn compare(&self, hash: &str, candidate: &str) -> Result<()>;
}

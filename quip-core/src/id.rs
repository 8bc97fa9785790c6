//! Identifier generation for entries and blobs.
//!
//! Entry IDs are bearer capabilities: 128 random bits rendered as unpadded
//! URL-safe base64. Storage keys are ULIDs and never leave the server.

use crate::error::{QuipError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Number of random bytes behind every entry ID.
pub const ID_BYTES: usize = 16;

/// Length of an encoded entry ID.
pub const ID_LEN: usize = 22;

#[derive(Debug, Clone, Copy)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Check the OS entropy source once. Failure here is a startup condition,
    /// `new_id` itself never fails.
    pub fn new() -> Result<Self> {
        let mut sample = [0u8; ID_BYTES];
        OsRng.try_fill_bytes(&mut sample).map_err(|e| {
            QuipError::Internal(format!("entropy source unavailable: {}", e))
        })?;
        Ok(Self { _private: () })
    }

    pub fn new_id(&self) -> String {
        let mut bytes = [0u8; ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn new_storage_key(&self) -> String {
        ulid::Ulid::new().to_string()
    }
}

/// Cheap shape check so obviously malformed IDs never reach the database.
pub fn is_well_formed(id: &str) -> bool {
    id.len() == ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

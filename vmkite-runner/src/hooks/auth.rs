//! Per-job bearer tokens
//!
//! A token is a random nonce followed by an HMAC-SHA256 over the job ID and
//! the nonce, both hex encoded. Issued tokens are kept in memory only.

use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use std::collections::HashMap;

use super::error::HookError;

type HmacSha256 = Hmac<Sha256>;

/// Random bytes prefixed to every token
pub const NONCE_LEN: usize = 10;

const SECRET_LEN: usize = 32;

/// Generates a hex encoded secret for when none is configured
pub fn generate_secret() -> Result<String, HookError> {
    let mut secret = [0u8; SECRET_LEN];
    OsRng.try_fill_bytes(&mut secret)?;
    Ok(hex::encode(secret))
}

pub fn compute_token(secret: &[u8], job_id: &str, nonce: &[u8]) -> Result<String, HookError> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(job_id.as_bytes());
    mac.update(nonce);
    Ok(format!(
        "{}{}",
        hex::encode(nonce),
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Token to job ID mapping
pub struct TokenTable {
    secret: Vec<u8>,
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenTable {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Issues a fresh token for the job
    pub fn issue(&self, job_id: &str) -> Result<String, HookError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.try_fill_bytes(&mut nonce)?;

        let token = compute_token(&self.secret, job_id, &nonce)?;
        self.tokens
            .write()
            .insert(token.clone(), job_id.to_string());
        Ok(token)
    }

    pub fn resolve(&self, token: &str) -> Option<String> {
        self.tokens.read().get(token).cloned()
    }

    /// Invalidates every token issued for the job
    pub fn revoke(&self, job_id: &str) {
        self.tokens.write().retain(|_, owner| owner != job_id);
    }
}

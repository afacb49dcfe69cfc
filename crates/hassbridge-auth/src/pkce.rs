//! PKCE (Proof Key for Code Exchange, RFC 7636) and CSRF state values

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

const RANDOM_BYTES: usize = 32;

#[derive(Clone)]
pub struct PkcePair {
    /// Sent only with the code exchange
    pub verifier: String,
    /// S256 challenge sent with the authorization request
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = random_url_safe();
        let challenge = Self::challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// base64url(SHA-256(verifier))
    pub fn challenge_for(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Opaque `state` parameter
pub fn random_state() -> String {
    random_url_safe()
}

fn random_url_safe() -> String {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

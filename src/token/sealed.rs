//! Sealed token maker
//!
//! Tokens are the JSON payload encrypted with XChaCha20-Poly1305 under a
//! server-held 256-bit key. Wire format:
//!
//! ```text
//! sealed.v1.<base64url(nonce[24] || ciphertext || tag[16])>
//! ```
//!
//! The header is bound as associated data, so neither header nor body can
//! be altered without failing authentication.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload as AeadPayload},
    Key, XChaCha20Poly1305, XNonce,
};
use chrono::Duration;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{Payload, TokenError, TokenMaker};

/// Required symmetric key length in bytes
pub const SYMMETRIC_KEY_SIZE: usize = 32;

const HEADER: &str = "sealed.v1.";
const NONCE_SIZE: usize = 24;

#[derive(Zeroize, ZeroizeOnDrop)]
struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

pub struct SealedTokenMaker {
    key: SymmetricKey,
}

impl SealedTokenMaker {
    /// Create a maker from the configured key.
    ///
    /// # Errors
    /// `TokenError::InvalidKeySize` unless the key is exactly 32 bytes.
    pub fn new(symmetric_key: &str) -> Result<Self, TokenError> {
        Self::from_bytes(symmetric_key.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TokenError> {
        let key: [u8; SYMMETRIC_KEY_SIZE] =
            bytes.try_into().map_err(|_| TokenError::InvalidKeySize {
                expected: SYMMETRIC_KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self {
            key: SymmetricKey(key),
        })
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.key.0))
    }
}

impl std::fmt::Debug for SealedTokenMaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedTokenMaker").finish_non_exhaustive()
    }
}

impl TokenMaker for SealedTokenMaker {
    fn create_token(&self, username: &str, duration: Duration) -> Result<(String, Payload), TokenError> {
        let payload = Payload::new(username, duration);
        let message =
            serde_json::to_vec(&payload).map_err(|e| TokenError::Sealing(e.to_string()))?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()
            .encrypt(
                XNonce::from_slice(&nonce),
                AeadPayload {
                    msg: &message,
                    aad: HEADER.as_bytes(),
                },
            )
            .map_err(|e| TokenError::Sealing(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        let token = format!("{HEADER}{}", URL_SAFE_NO_PAD.encode(sealed));
        Ok((token, payload))
    }

    fn verify_token(&self, token: &str) -> Result<Payload, TokenError> {
        let body = token.strip_prefix(HEADER).ok_or(TokenError::InvalidToken)?;
        let sealed = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| TokenError::InvalidToken)?;
        if sealed.len() <= NONCE_SIZE {
            return Err(TokenError::InvalidToken);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let message = self
            .cipher()
            .decrypt(
                XNonce::from_slice(nonce),
                AeadPayload {
                    msg: ciphertext,
                    aad: HEADER.as_bytes(),
                },
            )
            .map_err(|_| TokenError::InvalidToken)?;

        let payload: Payload =
            serde_json::from_slice(&message).map_err(|_| TokenError::InvalidToken)?;
        payload.valid()?;

        Ok(payload)
    }
}

//! Flag codec (component A, §4.A): minting and verifying signed flag
//! tokens of the form `<nonce>=<signature>`.

use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{OsRng, RngCore};

use crate::error::FlagError;

const NONCE_BYTES: usize = 16;

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
}

/// A minted flag token, ready to hand to the probe driver's `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagToken(String);

impl FlagToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FlagToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<FlagToken> for String {
    fn from(t: FlagToken) -> String {
        t.0
    }
}

/// Mints and verifies flag tokens under a single ed25519 keypair,
/// generated once at daemon startup and passed explicitly — never a
/// process global (§9's context-object redesign note).
#[derive(Clone)]
pub struct FlagCodec {
    signing_key: std::sync::Arc<SigningKey>,
    verifying_key: VerifyingKey,
}

impl FlagCodec {
    /// Generates a fresh signing key from the OS CSPRNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key: std::sync::Arc::new(signing_key),
            verifying_key,
        }
    }

    /// mint() → token (§4.A). Fails only on entropy exhaustion; the OS
    /// RNG used here does not return a recoverable error on this
    /// platform, so this is modeled as infallible in practice while
    /// still returning `Result` so callers don't assume it.
    pub fn mint(&self) -> Result<FlagToken, FlagError> {
        let mut nonce = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut nonce);
        let nonce_hex = hex::encode(nonce);
        let signature: Signature = self.signing_key.sign(nonce_hex.as_bytes());
        let sig_b64 = b64().encode(signature.to_bytes());
        Ok(FlagToken(format!("{nonce_hex}={sig_b64}")))
    }

    /// verify(token) → bool (§4.A). Never panics on adversarial input.
    pub fn verify(&self, token: &str) -> bool {
        let Some((nonce_hex, sig_b64)) = token.split_once('=') else {
            return false;
        };
        let Ok(sig_bytes) = b64().decode(sig_b64) else {
            return false;
        };
        let Ok(sig_bytes): Result<[u8; 64], _> = sig_bytes.try_into() else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_bytes);
        self.verifying_key
            .verify(nonce_hex.as_bytes(), &signature)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_then_verify_succeeds() {
        let codec = FlagCodec::generate();
        let token = codec.mint().unwrap();
        assert!(codec.verify(token.as_str()));
    }

    #[test]
    fn verify_rejects_garbage() {
        let codec = FlagCodec::generate();
        assert!(!codec.verify("not a real token"));
        assert!(!codec.verify(""));
        assert!(!codec.verify("=="));
    }

    #[test]
    fn verify_rejects_tokens_from_a_different_key() {
        let codec_a = FlagCodec::generate();
        let codec_b = FlagCodec::generate();
        let token = codec_a.mint().unwrap();
        assert!(!codec_b.verify(token.as_str()));
    }

    #[test]
    fn verify_rejects_tampered_nonce() {
        let codec = FlagCodec::generate();
        let token = codec.mint().unwrap();
        let (nonce, sig) = token.as_str().split_once('=').unwrap();
        let mut chars: Vec<char> = nonce.chars().collect();
        chars[0] = if chars[0] == '0' { '1' } else { '0' };
        let tampered_nonce: String = chars.into_iter().collect();
        let tampered = format!("{tampered_nonce}={sig}");
        assert!(!codec.verify(&tampered));
    }
}

//! PKCE (RFC 7636) parameters and the per-attempt context.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use fitdash_core::{AuthError, Storage, StorageError};
use sha2::{Digest, Sha256};

/// Session storage key holding the code verifier of the pending login.
pub const VERIFIER_KEY: &str = "fitdash.pkce_code_verifier";

/// Session storage key holding the state of the pending login.
pub const STATE_KEY: &str = "fitdash.oauth_state";

/// The only challenge method this client sends.
pub const CHALLENGE_METHOD: &str = "S256";

const VERIFIER_BYTES: usize = 32;
const STATE_BYTES: usize = 16;

/// Generate a code verifier: 32 secure random bytes, 43 URL-safe characters.
pub fn generate_code_verifier() -> Result<String, AuthError> {
    random_url_safe(VERIFIER_BYTES)
}

/// Compute the S256 code challenge for a verifier (43 URL-safe characters).
pub fn generate_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Generate an anti-CSRF state: 16 secure random bytes, 22 URL-safe characters.
pub fn generate_state() -> Result<String, AuthError> {
    random_url_safe(STATE_BYTES)
}

fn random_url_safe(len: usize) -> Result<String, AuthError> {
    let mut bytes = vec![0u8; len];
    getrandom::getrandom(&mut bytes).map_err(|e| AuthError::RandomUnavailable(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Compare two opaque tokens without a length- or prefix-dependent early exit.
///
/// Both sides are hashed first so the comparison always walks 32 bytes.
pub fn tokens_match(expected: &str, received: &str) -> bool {
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(received.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Runtime state for one authorization attempt.
#[derive(Clone)]
pub struct PkceContext {
    /// PKCE code verifier (kept client-side until the exchange)
    pub code_verifier: String,
    /// Random state parameter for CSRF protection
    pub state: String,
}

impl PkceContext {
    /// Create a fresh context.
    pub fn generate() -> Result<Self, AuthError> {
        Ok(Self {
            code_verifier: generate_code_verifier()?,
            state: generate_state()?,
        })
    }

    /// The S256 challenge for this context's verifier.
    pub fn code_challenge(&self) -> String {
        generate_code_challenge(&self.code_verifier)
    }

    /// Persist the context in session-scoped storage.
    pub fn persist(&self, storage: &dyn Storage) -> Result<(), StorageError> {
        storage.set(VERIFIER_KEY, &self.code_verifier)?;
        storage.set(STATE_KEY, &self.state)
    }

    /// Delete any stored context.
    pub fn discard(storage: &dyn Storage) -> Result<(), StorageError> {
        storage.remove(VERIFIER_KEY)?;
        storage.remove(STATE_KEY)
    }
}

impl std::fmt::Debug for PkceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceContext")
            .field("code_verifier", &"<redacted>")
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitdash_core::MemoryStorage;
    use std::collections::HashSet;

    fn is_url_safe(s: &str) -> bool {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn test_verifier_format() {
        let verifier = generate_code_verifier().unwrap();
        assert_eq!(verifier.len(), 43);
        assert!(is_url_safe(&verifier));
    }

    #[test]
    fn test_state_format() {
        let state = generate_state().unwrap();
        assert_eq!(state.len(), 22);
        assert!(is_url_safe(&state));
    }

    #[test]
    fn test_no_repeats_across_many_calls() {
        let mut verifiers = HashSet::new();
        let mut states = HashSet::new();
        for _ in 0..1000 {
            let verifier = generate_code_verifier().unwrap();
            let state = generate_state().unwrap();
            assert_eq!(verifier.len(), 43);
            assert_eq!(state.len(), 22);
            assert!(is_url_safe(&verifier) && is_url_safe(&state));
            assert!(verifiers.insert(verifier));
            assert!(states.insert(state));
        }
    }

    #[test]
    fn test_challenge_deterministic() {
        let verifier = generate_code_verifier().unwrap();
        let first = generate_code_challenge(&verifier);
        let second = generate_code_challenge(&verifier);
        assert_eq!(first, second);
        assert_eq!(first.len(), 43);
        assert!(is_url_safe(&first));
    }

    #[test]
    fn test_challenge_known_vector() {
        // RFC 7636 appendix B.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            generate_code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_distinct_verifiers_distinct_challenges() {
        let mut challenges = HashSet::new();
        for _ in 0..100 {
            let verifier = generate_code_verifier().unwrap();
            assert!(challenges.insert(generate_code_challenge(&verifier)));
        }
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("abc", "abc"));
        assert!(!tokens_match("abc", "abd"));
        assert!(!tokens_match("abc", "ab"));
        assert!(!tokens_match("abc", ""));
    }

    #[test]
    fn test_context_persist_and_discard() {
        let storage = MemoryStorage::new();
        let context = PkceContext::generate().unwrap();
        context.persist(&storage).unwrap();

        assert_eq!(
            storage.get(VERIFIER_KEY).unwrap().as_deref(),
            Some(context.code_verifier.as_str())
        );
        assert_eq!(storage.get(STATE_KEY).unwrap().as_deref(), Some(context.state.as_str()));

        PkceContext::discard(&storage).unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_context_debug_redacts_verifier() {
        let context = PkceContext::generate().unwrap();
        assert!(!format!("{context:?}").contains(&context.code_verifier));
    }
}

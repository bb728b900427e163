//! Per-application authorization: secret key, origin and user-agent checks.
//!
//! Secret keys are stored either as 32-character plaintext or, for longer keys,
//! encrypted with a gateway-wide AES-256-GCM key. Encrypted values are the hex
//! encoding of `nonce || ciphertext || tag`.

use crate::types::GatewaySettings;
use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN},
    rand::{SecureRandom, SystemRandom},
};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Length of a plaintext secret key, in characters.
pub const PLAINTEXT_KEY_LEN: usize = 32;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("secret key required")]
    MissingSecretKey,

    #[error("secret key too short")]
    SecretKeyTooShort,

    #[error("secret key mismatch")]
    SecretKeyMismatch,

    #[error("origin not allowed: {0}")]
    OriginNotAllowed(String),

    #[error("user agent not allowed: {0}")]
    UserAgentNotAllowed(String),

    #[error("invalid cipher key: {0}")]
    InvalidCipherKey(String),
}

/// Caller-supplied credentials for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerCredentials {
    pub secret_key: Option<String>,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
}

/// AES-256-GCM cipher for stored secret keys.
pub struct SecretKeyCipher {
    key: LessSafeKey,
}

impl std::fmt::Debug for SecretKeyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKeyCipher").finish_non_exhaustive()
    }
}

impl SecretKeyCipher {
    /// Builds a cipher from a hex-encoded 256-bit key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCipherKey`] if the key is not 64 hex characters.
    pub fn from_hex(hex_key: &str) -> Result<Self, AuthError> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| AuthError::InvalidCipherKey(format!("not hex: {e}")))?;
        let unbound = UnboundKey::new(&AES_256_GCM, &bytes)
            .map_err(|_| AuthError::InvalidCipherKey("expected 32 bytes".to_string()))?;
        Ok(Self { key: LessSafeKey::new(unbound) })
    }

    /// Decrypts a stored key. Returns `None` for anything that does not
    /// authenticate under this key.
    #[must_use]
    pub fn decrypt(&self, stored: &str) -> Option<String> {
        let mut bytes = hex::decode(stored.trim()).ok()?;
        if bytes.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return None;
        }
        let mut sealed = bytes.split_off(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(&bytes).ok()?;
        let plaintext = self.key.open_in_place(nonce, Aad::empty(), &mut sealed).ok()?;
        String::from_utf8(plaintext.to_vec()).ok()
    }

    /// Encrypts a key into the stored representation.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCipherKey`] if no nonce could be generated.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AuthError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| AuthError::InvalidCipherKey("nonce generation failed".to_string()))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| AuthError::InvalidCipherKey("encryption failed".to_string()))?;

        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&in_out);
        Ok(hex::encode(out))
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Checks the caller's secret key against the application's settings.
///
/// Only enforced when the application requires a secret key. Callers with a
/// key longer than [`PLAINTEXT_KEY_LEN`] are matched against the decrypted
/// stored key; without a cipher such keys never match.
///
/// # Errors
///
/// Returns the first failing condition.
pub fn check_secret_key(
    settings: &GatewaySettings,
    supplied: Option<&str>,
    cipher: Option<&SecretKeyCipher>,
) -> Result<(), AuthError> {
    if !settings.secret_key_required {
        return Ok(());
    }

    let supplied = supplied.filter(|k| !k.is_empty()).ok_or(AuthError::MissingSecretKey)?;
    let matches = match supplied.chars().count() {
        len if len < PLAINTEXT_KEY_LEN => return Err(AuthError::SecretKeyTooShort),
        PLAINTEXT_KEY_LEN => constant_time_eq(supplied, &settings.secret_key),
        _ => cipher
            .and_then(|c| c.decrypt(&settings.secret_key))
            .is_some_and(|stored| constant_time_eq(supplied, &stored)),
    };

    if matches {
        Ok(())
    } else {
        Err(AuthError::SecretKeyMismatch)
    }
}

/// Origin must equal a whitelist entry, ignoring case. Empty whitelist passes.
///
/// # Errors
///
/// Returns [`AuthError::OriginNotAllowed`] on a miss.
pub fn check_origin(whitelist: &[String], origin: Option<&str>) -> Result<(), AuthError> {
    if whitelist.is_empty() {
        return Ok(());
    }
    let origin = origin.unwrap_or_default();
    if whitelist.iter().any(|allowed| allowed.eq_ignore_ascii_case(origin)) {
        Ok(())
    } else {
        Err(AuthError::OriginNotAllowed(origin.to_string()))
    }
}

/// User agent must contain a whitelist entry, ignoring case. Empty whitelist passes.
///
/// # Errors
///
/// Returns [`AuthError::UserAgentNotAllowed`] on a miss.
pub fn check_user_agent(whitelist: &[String], user_agent: Option<&str>) -> Result<(), AuthError> {
    if whitelist.is_empty() {
        return Ok(());
    }
    let user_agent = user_agent.unwrap_or_default();
    let lowered = user_agent.to_lowercase();
    if whitelist.iter().any(|allowed| lowered.contains(&allowed.to_lowercase())) {
        Ok(())
    } else {
        Err(AuthError::UserAgentNotAllowed(user_agent.to_string()))
    }
}

/// Runs every check for one request.
///
/// # Errors
///
/// Returns the first failing check.
pub fn authorize(
    settings: &GatewaySettings,
    caller: &CallerCredentials,
    cipher: Option<&SecretKeyCipher>,
) -> Result<(), AuthError> {
    check_secret_key(settings, caller.secret_key.as_deref(), cipher)?;
    check_origin(&settings.whitelist_origins, caller.origin.as_deref())?;
    check_user_agent(&settings.whitelist_user_agents, caller.user_agent.as_deref())
}

//! CURVE key pair value type.
//!
//! Keys are carried as Z85 text (40 printable characters encoding 32 bytes),
//! which is the format ZeroMQ accepts for its `CURVE_*KEY` socket options and
//! the format persisted in the key files.

use std::fmt;

use thiserror::Error;

/// Length of a Z85-encoded 32-byte CURVE key.
pub const Z85_KEY_LEN: usize = 40;

const Z85_ALPHABET: &str =
    "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ.-:+=^!/*?&<>()[]{}@%$#";

/// Error type for key validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("{which} key must be {expected} Z85 characters, got {actual}")]
    WrongLength {
        which: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{which} key contains a character outside the Z85 alphabet")]
    InvalidCharacter { which: &'static str },
}

/// An immutable public/secret CURVE key pair.
///
/// `Debug` output never contains the secret key.
#[derive(Clone, PartialEq, Eq)]
pub struct CurveKeyPair {
    public_key: String,
    secret_key: String,
}

impl CurveKeyPair {
    /// Builds a key pair from two Z85 strings.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] when either key is not a 40-character Z85 string.
    pub fn new(public_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, KeyError> {
        let public_key = public_key.into();
        let secret_key = secret_key.into();
        validate_z85_key("public", &public_key)?;
        validate_z85_key("secret", &secret_key)?;
        Ok(Self {
            public_key,
            secret_key,
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for CurveKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurveKeyPair")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Checks that `key` is a 40-character Z85 string.
///
/// # Errors
///
/// Returns [`KeyError`] describing the first problem found.
pub fn validate_z85_key(which: &'static str, key: &str) -> Result<(), KeyError> {
    if key.len() != Z85_KEY_LEN {
        return Err(KeyError::WrongLength {
            which,
            expected: Z85_KEY_LEN,
            actual: key.len(),
        });
    }
    if !key.chars().all(|c| Z85_ALPHABET.contains(c)) {
        return Err(KeyError::InvalidCharacter { which });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

use std::fmt;

use rand::Rng;
use thiserror::Error;

/// Number of characters in every short code.
pub const SHORT_CODE_LEN: usize = 6;

/// The 62 symbols a short code is drawn from.
pub const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// Largest multiple of 62 that fits in a byte; anything at or above it is rejected
// so every symbol stays equally likely.
const REJECTION_BOUND: u8 = 248;

/// The public handle of a [`crate::url_repo::UrlMapping`].
///
/// Always exactly [`SHORT_CODE_LEN`] ASCII alphanumeric characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShortCode(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortCodeValidationError {
    #[error("short code must be exactly {SHORT_CODE_LEN} characters, got {actual}")]
    InvalidLength { actual: usize },
    #[error("short code contains invalid characters: {invalid_chars}")]
    InvalidCharacters { invalid_chars: String },
}

impl ShortCode {
    /// # Errors
    /// Will return [`Err`] when `code` is not [`SHORT_CODE_LEN`] alphanumeric characters.
    pub fn new(code: String) -> Result<Self, ShortCodeValidationError> {
        let invalid_chars: String = code.chars().filter(|c| !c.is_ascii_alphanumeric()).collect();
        if !invalid_chars.is_empty() {
            return Err(ShortCodeValidationError::InvalidCharacters { invalid_chars });
        }

        if code.len() != SHORT_CODE_LEN {
            return Err(ShortCodeValidationError::InvalidLength { actual: code.len() });
        }

        Ok(Self(code))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces candidate short codes.
///
/// Implementations only generate; checking the candidate against the store
/// is the job of [`crate::code_alloc::CodeAllocator`].
#[cfg_attr(test, mockall::automock)]
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> ShortCode;
}

/// Draws every character independently from [`ALPHABET`] using the
/// thread-local CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> ShortCode {
        let mut rng = rand::rng();
        let mut code = String::with_capacity(SHORT_CODE_LEN);
        let mut buf = [0; 16];

        while code.len() < SHORT_CODE_LEN {
            rng.fill_bytes(&mut buf);
            for byte in buf {
                if byte >= REJECTION_BOUND {
                    continue;
                }
                code.push(char::from(ALPHABET[usize::from(byte % 62)]));
                if code.len() == SHORT_CODE_LEN {
                    break;
                }
            }
        }

        ShortCode(code)
    }
}

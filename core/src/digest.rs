//! Digest primitive used by the digest stage.
//!
//! The algorithm is picked by name from a small fixed set. Names are matched
//! case-insensitively. An unrecognised name (including the empty string)
//! selects [`DigestAlgorithm::Encoding`], a reversible base64 encoding: callers
//! must not treat that output as a one-way hash.
//!
//! | Name | Output |
//! |---|---|
//! | `MD5` | hex, 32 chars |
//! | `SHA256` | hex, 64 chars |
//! | `SHA512` | hex, 128 chars |
//! | `ARGON2` | PHC string, randomly salted |
//! | anything else | standard base64 of the input |

use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest as _, Sha256, Sha512};
use std::fmt;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DigestAlgorithm {
    /// MD5, hex encoded.
    Md5,
    /// SHA-256, hex encoded.
    Sha256,
    /// SHA-512, hex encoded.
    Sha512,
    /// Argon2id with a random salt, PHC encoded.
    Argon2,
    /// Reversible base64 encoding, used for unrecognised names.
    #[default]
    Encoding,
}

impl DigestAlgorithm {
    /// Resolve an algorithm name. Never fails: unknown names map to
    /// [`DigestAlgorithm::Encoding`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "MD5" => Self::Md5,
            "SHA256" | "SHA-256" => Self::Sha256,
            "SHA512" | "SHA-512" => Self::Sha512,
            "ARGON2" | "ARGON2ID" => Self::Argon2,
            _ => Self::Encoding,
        }
    }

    /// Whether the output is a one-way hash.
    #[must_use]
    pub const fn is_one_way(self) -> bool {
        !matches!(self, Self::Encoding)
    }

    /// Canonical name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
            Self::Argon2 => "ARGON2",
            Self::Encoding => "BASE64",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The digest primitive as seen by the digest stage.
///
/// [`DigestAlgorithm`] implements it directly; tests substitute a recording
/// implementation.
pub trait Digester: Send + Sync {
    /// Digest `data`.
    fn digest(&self, data: &[u8]) -> String;
}

impl Digester for DigestAlgorithm {
    fn digest(&self, data: &[u8]) -> String {
        digest(data, *self)
    }
}

/// Digest `data` with `algorithm`.
///
/// Argon2 hashing returns an empty string if the hasher rejects the input.
///
/// # Example
///
/// ```
/// use credflow_core::digest::{digest, DigestAlgorithm};
///
/// assert_eq!(digest(b"abc", DigestAlgorithm::Md5), "900150983cd24fb0d6963f7d28e17f72");
/// assert_eq!(digest(b"abc", DigestAlgorithm::Encoding), "YWJj");
/// ```
#[must_use]
pub fn digest(data: &[u8], algorithm: DigestAlgorithm) -> String {
    match algorithm {
        DigestAlgorithm::Md5 => format!("{:x}", md5::compute(data)),
        DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        DigestAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
        DigestAlgorithm::Argon2 => {
            let salt = SaltString::generate(rand::thread_rng());
            Argon2::default()
                .hash_password(data, &salt)
                .map(|hash| hash.to_string())
                .unwrap_or_default()
        },
        DigestAlgorithm::Encoding => STANDARD.encode(data),
    }
}

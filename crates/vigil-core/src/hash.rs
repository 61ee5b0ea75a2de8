//! Canonical text hashing.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// First 16 hex chars of SHA-256 over the NFC-normalized input.
///
/// NFC normalization makes the hash insensitive to Unicode composition
/// differences in otherwise identical documents.
#[must_use]
pub fn sha256_16(text: &str) -> String {
    let canonical: String = text.nfc().collect();
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_owned()
}

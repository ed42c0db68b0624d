//! Short, stable digests of canonical emails.

use crate::error::IdentityError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Number of hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 8;

/// Hash primitive used to derive fingerprints.
///
/// `Rolling` stands in when no cryptographic digest is available. Both
/// produce the same 8-hex-character shape so storage keys stay stable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Digester {
    #[default]
    Sha256,
    Rolling,
}

impl Digester {
    /// Digest `input` and render the first 8 lowercase hex characters.
    pub fn fingerprint(&self, input: &str) -> Fingerprint {
        let hex = match self {
            Digester::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(input.as_bytes());
                let mut hex = hex::encode(hasher.finalize());
                hex.truncate(FINGERPRINT_LEN);
                hex
            }
            Digester::Rolling => format!("{:08x}", rolling_hash(input)),
        };
        Fingerprint(hex)
    }
}

/// 32-bit `h = h * 31 + unit` over UTF-16 code units, wrapping.
fn rolling_hash(input: &str) -> u32 {
    input
        .encode_utf16()
        .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(u32::from(unit)))
}

/// Fingerprint a canonical email with SHA-256.
pub fn fingerprint(normalized_email: &str) -> Fingerprint {
    Digester::Sha256.fingerprint(normalized_email)
}

/// 8 lowercase hex characters identifying one canonical email.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == FINGERPRINT_LEN
            && s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'));
        if valid {
            Ok(Fingerprint(s.to_string()))
        } else {
            Err(IdentityError::InvalidFingerprint(s.to_string()))
        }
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_shape(fp: &Fingerprint) {
        assert_eq!(fp.as_str().len(), FINGERPRINT_LEN);
        assert!(fp.as_str().chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    #[test]
    fn test_sha256_prefix() {
        assert_eq!(fingerprint("ab@gmail.com").as_str(), "86ca2ad2");
        assert_eq!(fingerprint("new@company.com").as_str(), "e16490c8");
    }

    #[test]
    fn test_fingerprint_is_idempotent() {
        let a = fingerprint("a.b@other.com");
        let b = fingerprint("a.b@other.com");
        assert_eq!(a, b);
        assert_shape(&a);
    }

    #[test]
    fn test_rolling_fallback_shape() {
        for input in ["ab@gmail.com", "new@company.com", "", "ünïcødé@example.com"] {
            let fp = Digester::Rolling.fingerprint(input);
            assert_shape(&fp);
            assert_eq!(fp, Digester::Rolling.fingerprint(input));
        }
    }

    #[test]
    fn test_rolling_known_values() {
        assert_eq!(Digester::Rolling.fingerprint("ab@gmail.com").as_str(), "a312c4d2");
        assert_eq!(Digester::Rolling.fingerprint("").as_str(), "00000000");
    }

    #[test]
    fn test_parse_fingerprint() {
        assert!("deadbeef".parse::<Fingerprint>().is_ok());
        assert!("DEADBEEF".parse::<Fingerprint>().is_err());
        assert!("deadbee".parse::<Fingerprint>().is_err());
        assert!("deadbeefx".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_fingerprint_serde() {
        let fp = fingerprint("new@company.com");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, "\"e16490c8\"");

        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
        assert!(serde_json::from_str::<Fingerprint>("\"nothex!!\"").is_err());
    }
}

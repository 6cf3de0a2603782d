//! Secret and public claim-code forms
//!
//! A claim code is the printable string `e<amount>:secret:<64-hex>` that
//! functions as a bearer credential.  The public form replaces the secret
//! key with its SHA-256 hash and is safe to share with the server for
//! health checks.  The derivation hashes the ASCII hex representation of
//! the secret, not the raw 32 bytes; this is an interoperability
//! requirement of the wire protocol.

use crate::core::constants::SECRET_HEX_LEN;
use crate::core::Amount;
use sha2::{Digest, Sha256};
use std::fmt;

/// A secret claim code: the bearer credential itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretWebcash {
    /// Face value of the claim.
    pub amount: Amount,
    /// 64 hex characters of secret key material.
    pub sk: String,
}

/// A public claim descriptor: the amount and the hash of the secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicWebcash {
    /// Face value of the claim.
    pub amount: Amount,
    /// SHA-256 of the ASCII hex secret.
    pub pk: [u8; 32],
}

/// Split a claim-code string into its amount and hex parts, verifying the
/// `e<amount>:<kind>:<hex>` frame.  Tolerates one pair of enclosing quotes.
fn split_claim<'a>(s: &'a str, kind: &str) -> Option<(Amount, &'a str)> {
    let mut s = s;
    if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
        s = &s[1..s.len() - 1];
    }
    let rest = s.strip_prefix('e')?;
    let mut parts = rest.splitn(3, ':');
    let amount_str = parts.next()?;
    let kind_str = parts.next()?;
    let hex_str = parts.next()?;
    if kind_str != kind {
        return None;
    }
    if hex_str.len() != SECRET_HEX_LEN || !hex_str.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let amount = Amount::parse(amount_str)?;
    Some((amount, hex_str))
}

/// Render a claim code.  Negative amounts are clamped to zero so that a
/// corrupted amount can never round-trip through the textual form.
fn claim_string(f: &mut fmt::Formatter<'_>, amount: Amount, kind: &str, hex: &str) -> fmt::Result {
    let amount = if amount.0 < 0 { Amount::ZERO } else { amount };
    write!(f, "e{amount}:{kind}:{hex}")
}

impl SecretWebcash {
    /// Parse a `e<amount>:secret:<hex>` claim code.
    ///
    /// The hex casing is preserved verbatim: the public derivation hashes
    /// the string as given, so normalizing it would change the identity of
    /// the claim.
    pub fn parse(s: &str) -> Option<SecretWebcash> {
        let (amount, hex) = split_claim(s, "secret")?;
        Some(SecretWebcash { amount, sk: hex.to_owned() })
    }

    /// Derive the public form by hashing the ASCII secret.
    pub fn to_public(&self) -> PublicWebcash {
        let digest = Sha256::digest(self.sk.as_bytes());
        PublicWebcash { amount: self.amount, pk: digest.into() }
    }
}

impl PublicWebcash {
    /// Parse a `e<amount>:public:<hex>` claim descriptor.
    pub fn parse(s: &str) -> Option<PublicWebcash> {
        let (amount, hex) = split_claim(s, "public")?;
        let bytes = hex::decode(hex).ok()?;
        let pk: [u8; 32] = bytes.try_into().ok()?;
        Some(PublicWebcash { amount, pk })
    }
}

impl fmt::Display for SecretWebcash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        claim_string(f, self.amount, "secret", &self.sk)
    }
}

impl fmt::Display for PublicWebcash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        claim_string(f, self.amount, "public", &hex::encode(self.pk))
    }
}

//! Order-comparable encoding for range-classified fields.
//!
//! A range-classified value is stored with a 16-byte order code computed by
//! a keyed, strictly monotone affine map over the plaintext ordinal:
//!
//! ```text
//! code = ordinal * scale + offset        (u128 arithmetic, scale odd)
//! ```
//!
//! Comparing two codes compares the plaintexts, which is exactly the query
//! capability this class trades away confidentiality for. The map hides the
//! raw ordinal from casual inspection but deliberately reveals order (and
//! approximate ratios) to anyone holding the stored documents; fields that
//! must not leak order belong in the `Random` class.
//!
//! Ordinals are defined for ISO `YYYY-MM-DD` date strings and for signed
//! integers; both encodings are monotone in the natural order of their type.

use crate::context::FieldContext;
use crate::error::Error;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretVec};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Keyed parameters of the monotone order-code map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeParams {
    scale: u64,
    offset: u64,
}

impl RangeParams {
    /// Derives the per-field map parameters from the collection DEK.
    ///
    /// The derivation is `HMAC-SHA256(dek, context || "|range-params")`,
    /// split into scale and offset; the scale is forced odd so the map is
    /// strictly monotone.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` if the DEK cannot key the MAC.
    pub fn derive(dek: &SecretVec<u8>, context: &FieldContext) -> Result<Self, Error> {
        let mut mac = HmacSha256::new_from_slice(dek.expose_secret())
            .map_err(|_| Error::KeyDerivation)?;
        mac.update(context.to_string().as_bytes());
        mac.update(b"|range-params");
        let bytes = mac.finalize().into_bytes();

        let mut scale_bytes = [0u8; 8];
        scale_bytes.copy_from_slice(&bytes[..8]);
        let mut offset_bytes = [0u8; 8];
        offset_bytes.copy_from_slice(&bytes[8..16]);

        Ok(Self { scale: u64::from_be_bytes(scale_bytes) | 1, offset: u64::from_be_bytes(offset_bytes) })
    }

    /// Maps a plaintext ordinal to its order code.
    #[must_use]
    pub const fn code(&self, ordinal: u64) -> u128 {
        ordinal as u128 * self.scale as u128 + self.offset as u128
    }
}

/// Extracts the order-preserving ordinal of a range-encodable value.
///
/// Supported plaintexts:
/// - ISO date strings `YYYY-MM-DD` (ordered by date)
/// - signed integers (ordered numerically)
///
/// # Errors
///
/// Returns [`Error::InvalidValue`] for any other value shape.
pub fn ordinal(field: &str, value: &Value) -> Result<u64, Error> {
    match value {
        Value::String(s) => date_ordinal(field, s),
        Value::Number(n) => n.as_i64().map(int_ordinal).ok_or_else(|| Error::InvalidValue {
            field: field.to_string(),
            detail: "number is not a signed 64-bit integer".to_string(),
        }),
        other => Err(Error::InvalidValue {
            field: field.to_string(),
            detail: format!("not range-encodable: {}", type_name(other)),
        }),
    }
}

/// Maps a signed integer to a u64 preserving numeric order.
const fn int_ordinal(v: i64) -> u64 {
    // Two's-complement sign-flip: i64::MIN -> 0, i64::MAX -> u64::MAX.
    (v as u64) ^ (1 << 63)
}

fn date_ordinal(field: &str, s: &str) -> Result<u64, Error> {
    let invalid = || Error::InvalidValue {
        field: field.to_string(),
        detail: "expected ISO date YYYY-MM-DD".to_string(),
    };

    let bytes = s.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return Err(invalid());
    }

    let year: u64 = s[..4].parse().map_err(|_| invalid())?;
    let month: u64 = s[5..7].parse().map_err(|_| invalid())?;
    let day: u64 = s[8..10].parse().map_err(|_| invalid())?;

    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(invalid());
    }

    // Monotone in (year, month, day); zero-padded ISO dates compare the same
    // way lexicographically.
    Ok(year * 10_000 + month * 100 + day)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

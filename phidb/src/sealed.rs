//! Sealed-value envelope for classified field ciphertext.
//!
//! Every encrypted field value is stored as a self-describing binary
//! envelope:
//!
//! ```text
//! [version:1][class:1][key_name_len:1][key_name:N][nonce_len:1][nonce:L][order:16]?[data]
//! ```
//!
//! The class tag is what lets decryption detect a misconfigured migration
//! (`SchemaMismatch`), and the key alt-name records which data key sealed
//! the value. The 16-byte order code is present only for range-classified
//! values.

use crate::error::Error;
use crate::schema::EncryptionClass;

/// Format version for sealed values.
pub const FORMAT_VERSION: u8 = 1;

/// A parsed or to-be-serialized encrypted field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedValue {
    version: u8,
    class: EncryptionClass,
    key_alt_name: String,
    nonce: Vec<u8>,
    order_code: Option<u128>,
    data: Vec<u8>,
}

impl SealedValue {
    /// Creates a sealed value for serialization.
    ///
    /// # Arguments
    ///
    /// * `class` - Encryption class the value was sealed under
    /// * `key_alt_name` - Alt-name of the data key used
    /// * `nonce` - AEAD nonce (empty for deterministic values)
    /// * `order_code` - Order-comparable code; present iff `class` is
    ///   [`EncryptionClass::Range`]
    /// * `data` - The AEAD ciphertext
    #[must_use]
    pub fn new(
        class: EncryptionClass,
        key_alt_name: impl Into<String>,
        nonce: Vec<u8>,
        order_code: Option<u128>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            class,
            key_alt_name: key_alt_name.into(),
            nonce,
            order_code,
            data,
        }
    }

    /// Returns the format version.
    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    /// Returns the encryption class recorded in the envelope.
    #[must_use]
    pub const fn class(&self) -> EncryptionClass {
        self.class
    }

    /// Returns the alt-name of the sealing data key.
    #[must_use]
    pub fn key_alt_name(&self) -> &str {
        &self.key_alt_name
    }

    /// Returns the AEAD nonce.
    #[must_use]
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// Returns the order-comparable code for range-classified values.
    #[must_use]
    pub const fn order_code(&self) -> Option<u128> {
        self.order_code
    }

    /// Returns the AEAD ciphertext.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Serializes the envelope to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSealed`] if the key alt-name or nonce exceed
    /// their one-byte length prefixes, or if the order code's presence
    /// disagrees with the class.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        if self.key_alt_name.len() > 255 {
            return Err(Error::InvalidSealed(format!(
                "key alt-name too long: {} bytes (max: 255)",
                self.key_alt_name.len()
            )));
        }
        if self.nonce.len() > 255 {
            return Err(Error::InvalidSealed(format!(
                "nonce too long: {} bytes (max: 255)",
                self.nonce.len()
            )));
        }
        match (self.class, self.order_code) {
            (EncryptionClass::Range, None) => {
                return Err(Error::InvalidSealed("range value missing order code".to_string()));
            }
            (EncryptionClass::Deterministic | EncryptionClass::Random, Some(_)) => {
                return Err(Error::InvalidSealed(
                    "order code present on non-range value".to_string(),
                ));
            }
            _ => {}
        }

        let mut bytes = Vec::with_capacity(
            4 + self.key_alt_name.len()
                + self.nonce.len()
                + if self.order_code.is_some() { 16 } else { 0 }
                + self.data.len(),
        );

        bytes.push(self.version);
        bytes.push(self.class.tag());

        // Safe cast: length validated above (max 255)
        #[allow(clippy::cast_possible_truncation)]
        let name_len = self.key_alt_name.len() as u8;
        bytes.push(name_len);
        bytes.extend_from_slice(self.key_alt_name.as_bytes());

        // Safe cast: length validated above (max 255)
        #[allow(clippy::cast_possible_truncation)]
        let nonce_len = self.nonce.len() as u8;
        bytes.push(nonce_len);
        bytes.extend_from_slice(&self.nonce);

        if let Some(order) = self.order_code {
            bytes.extend_from_slice(&order.to_be_bytes());
        }

        bytes.extend_from_slice(&self.data);

        Ok(bytes)
    }

    /// Parses an envelope, consuming the whole input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedVersion`] for an unknown format version
    /// and [`Error::InvalidSealed`] for truncated or malformed input.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::InvalidSealed("empty sealed value".to_string()));
        }

        let mut pos = 0;

        let version = data[pos];
        pos += 1;
        if version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion {
                version,
                supported: FORMAT_VERSION.to_string(),
            });
        }

        if pos >= data.len() {
            return Err(Error::InvalidSealed("missing class tag".to_string()));
        }
        let class = EncryptionClass::from_tag(data[pos])
            .ok_or_else(|| Error::InvalidSealed(format!("unknown class tag: {}", data[pos])))?;
        pos += 1;

        if pos >= data.len() {
            return Err(Error::InvalidSealed("missing key alt-name length".to_string()));
        }
        let name_len = data[pos] as usize;
        pos += 1;
        if pos + name_len > data.len() {
            return Err(Error::InvalidSealed("key alt-name truncated".to_string()));
        }
        let key_alt_name = String::from_utf8(data[pos..pos + name_len].to_vec())
            .map_err(|e| Error::InvalidSealed(format!("invalid key alt-name UTF-8: {e}")))?;
        pos += name_len;

        if pos >= data.len() {
            return Err(Error::InvalidSealed("missing nonce length".to_string()));
        }
        let nonce_len = data[pos] as usize;
        pos += 1;
        if pos + nonce_len > data.len() {
            return Err(Error::InvalidSealed("nonce truncated".to_string()));
        }
        let nonce = data[pos..pos + nonce_len].to_vec();
        pos += nonce_len;

        let order_code = if class == EncryptionClass::Range {
            if pos + 16 > data.len() {
                return Err(Error::InvalidSealed("order code truncated".to_string()));
            }
            let mut order_bytes = [0u8; 16];
            order_bytes.copy_from_slice(&data[pos..pos + 16]);
            pos += 16;
            Some(u128::from_be_bytes(order_bytes))
        } else {
            None
        };

        let payload = data[pos..].to_vec();

        Ok(Self { version, class, key_alt_name, nonce, order_code, data: payload })
    }
}

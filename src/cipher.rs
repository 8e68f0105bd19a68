//! Decryption of encrypted sensor payloads
//!
//! Sensors that encrypt their SpO2 value send it as a Base64 string holding
//! AES-128-CBC ciphertext with PKCS7 padding. The plaintext is the decimal
//! value as text.

use crate::error::CipherError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use std::fmt;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// AES-128 key length in bytes
pub const KEY_LEN: usize = 16;

/// AES block and IV length in bytes
pub const BLOCK_LEN: usize = 16;

/// Key and IV shared with the sensors
#[derive(Clone, PartialEq, Eq)]
pub struct PayloadCipher {
    key: [u8; KEY_LEN],
    iv: [u8; BLOCK_LEN],
}

impl fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCipher")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

impl PayloadCipher {
    pub fn new(key: [u8; KEY_LEN], iv: [u8; BLOCK_LEN]) -> Self {
        Self { key, iv }
    }

    /// Build a cipher from hex strings as written in the config file
    ///
    /// # Errors
    ///
    /// Returns `CipherError::InvalidKey` if either value is not hex or not
    /// exactly 16 bytes long.
    pub fn from_hex(key: &str, iv: &str) -> Result<Self, CipherError> {
        Ok(Self::new(decode_hex("key", key)?, decode_hex("iv", iv)?))
    }

    /// Decrypt a Base64 payload into its UTF-8 plaintext
    ///
    /// # Errors
    ///
    /// Fails on invalid Base64, ciphertext that is not a whole number of
    /// blocks, bad PKCS7 padding or non-UTF-8 plaintext.
    pub fn decrypt(&self, payload: &str) -> Result<String, CipherError> {
        let mut buffer = STANDARD.decode(payload.trim())?;
        if buffer.is_empty() || buffer.len() % BLOCK_LEN != 0 {
            return Err(CipherError::BlockLength(buffer.len()));
        }

        let plaintext_len = Aes128CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map_err(|_| CipherError::Padding)?
            .len();
        buffer.truncate(plaintext_len);

        Ok(String::from_utf8(buffer)?)
    }
}

fn decode_hex(name: &'static str, text: &str) -> Result<[u8; 16], CipherError> {
    let bytes = hex::decode(text.trim()).map_err(|e| CipherError::InvalidKey {
        name,
        reason: e.to_string(),
    })?;

    <[u8; 16]>::try_from(bytes.as_slice()).map_err(|_| CipherError::InvalidKey {
        name,
        reason: format!("expected 16 bytes, got {}", bytes.len()),
    })
}

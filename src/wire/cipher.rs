//! Encrypted envelope detection and AES-128-CBC decryption
//!
//! Envelope shape: `{"iv": "<hex>", "detail": "<url-encoded base64>"}`.
//! The key is a fixed 16-byte pre-shared secret. Plaintext is PKCS#7 padded
//! JSON; invalid UTF-8 in the plaintext is replaced rather than rejected.

use crate::error::DecryptError;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{
    alphabet,
    engine::{
        general_purpose::{GeneralPurpose, GeneralPurposeConfig},
        DecodePaddingMode,
    },
    Engine,
};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

/// Pre-shared key observed on the platform
pub const DEFAULT_KEY: &str = "Luckybird1234567";

pub const KEY_LEN: usize = 16;
const IV_LEN: usize = 16;

/// Standard alphabet, padding optional (the platform is inconsistent)
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encrypted wrapper object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub iv: String,
    pub detail: String,
}

impl Envelope {
    /// Returns the envelope iff the object carries non-empty `iv` and `detail`
    pub fn detect(obj: &Value) -> Option<Envelope> {
        let iv = obj.get("iv")?.as_str()?;
        let detail = obj.get("detail")?.as_str()?;
        if iv.is_empty() || detail.is_empty() {
            return None;
        }
        Some(Envelope {
            iv: iv.to_string(),
            detail: detail.to_string(),
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "iv": self.iv, "detail": self.detail })
    }
}

/// Result of running an object through the unwrapper
#[derive(Debug, Clone)]
pub struct Unwrapped {
    pub event: Value,
    pub was_encrypted: bool,
}

#[derive(Clone)]
pub struct CipherUnwrapper {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for CipherUnwrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherUnwrapper").finish_non_exhaustive()
    }
}

impl Default for CipherUnwrapper {
    fn default() -> Self {
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(DEFAULT_KEY.as_bytes());
        Self { key }
    }
}

impl CipherUnwrapper {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Build from a textual key; `None` unless it is exactly 16 bytes
    pub fn from_key_str(key: &str) -> Option<Self> {
        let bytes: [u8; KEY_LEN] = key.as_bytes().try_into().ok()?;
        Some(Self::new(bytes))
    }

    /// Pass plain objects through, decrypt envelopes
    pub fn unwrap_envelope(&self, obj: Value) -> Result<Unwrapped, DecryptError> {
        match Envelope::detect(&obj) {
            Some(envelope) => Ok(Unwrapped {
                event: self.open(&envelope)?,
                was_encrypted: true,
            }),
            None => Ok(Unwrapped {
                event: obj,
                was_encrypted: false,
            }),
        }
    }

    /// Decrypt an envelope into its inner JSON object
    pub fn open(&self, envelope: &Envelope) -> Result<Value, DecryptError> {
        let iv = parse_iv(&envelope.iv)?;
        let ciphertext = parse_detail(&envelope.detail)?;

        let plaintext = Aes128CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|e| DecryptError::Cipher(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| DecryptError::Cipher(e.to_string()))?;

        let text = String::from_utf8_lossy(&plaintext);
        Ok(serde_json::from_str(&text)?)
    }

    /// Reference encrypt operation (inverse of `open`)
    pub fn seal(&self, plaintext: &str, iv: [u8; IV_LEN]) -> Envelope {
        let ciphertext = Aes128CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        let encoded = LENIENT_BASE64.encode(ciphertext);

        Envelope {
            iv: hex::encode(iv),
            detail: utf8_percent_encode(&encoded, NON_ALPHANUMERIC).to_string(),
        }
    }

    /// `seal` with a fresh random IV
    pub fn seal_random(&self, plaintext: &str) -> Envelope {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        self.seal(plaintext, iv)
    }
}

fn parse_iv(raw: &str) -> Result<Vec<u8>, DecryptError> {
    let clean: String = raw.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    let iv = hex::decode(&clean).map_err(|e| DecryptError::InvalidIv(e.to_string()))?;
    if iv.len() != IV_LEN {
        return Err(DecryptError::InvalidIv(format!(
            "expected {} bytes, got {}",
            IV_LEN,
            iv.len()
        )));
    }
    Ok(iv)
}

fn parse_detail(raw: &str) -> Result<Vec<u8>, DecryptError> {
    let unescaped = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|e| DecryptError::InvalidCiphertextEncoding(e.to_string()))?;

    // URL-safe characters are mapped back onto the standard alphabet
    let normalized: String = unescaped
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    LENIENT_BASE64
        .decode(normalized)
        .map_err(|e| DecryptError::InvalidCiphertextEncoding(e.to_string()))
}

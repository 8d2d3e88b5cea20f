// Signed payload codec for the vendor's member API.
// Bodies are AES-128-ECB encrypted with PKCS#7 padding, base64 encoded and
// wrapped in a fixed envelope; a separate MD5 digest of the plaintext travels
// in the `reqdata` header.

use aes::Aes128;
use ecb::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyInit,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CodecError;

pub const BLOCK_SIZE: usize = 16;

type Aes128EcbEnc = ecb::Encryptor<Aes128>;
type Aes128EcbDec = ecb::Decryptor<Aes128>;

// Only the first 16 bytes are used as the AES key.
pub const VENDOR_KEY_MATERIAL: &str = "34e6adf9-979f-4f";

pub const REQDATA_SALT: &str = "4957CA66-37C3-46CB-B26D-E3D9DCB51535";

pub const ENVELOPE_SERVICE_VERSION: u32 = 2;

pub const ENVELOPE_TRANSPORT_KEY: &str = "Sg7FNdwhg3EApfUqiv0tdqhEhIdZE/02G/OMPFdrYGpHjZh7LUuzJIZyVqGuBDUuZTCm7MSCwo29cMCaZ6WBEKTfmFZUUDUusyPkITTvKxz5A1OH3qimML/hPHcbgRPPieMX8MfFsJxEUJYkdqEyK9jAHo5s3R4ZVhkyJbk1bjg31HKJgK4NtBmcQxRUmSvaHwKvOtFm12XwEvoQCX7Qd4yjmRtaYNCdjxdUWgRM2fvMo3ab4OqgYCfK8ruQlyqT+A+ZUPIhdlSB3z5tIv2wmai5d6wZYoEtW+rI9d05SflmSxRp8vg+iu+HkrPvwQGXG9qow/9pOvyibBxZpDw5ww==";

/// Outer wire wrapper for member API calls: `{"sv":2,"data":"<b64>","key":"<fixed>"}`.
/// Field order is part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    #[serde(rename = "sv")]
    pub service_version: u32,
    #[serde(rename = "data")]
    pub encrypted_payload: String,
    #[serde(rename = "key")]
    pub transport_key: String,
}

/// Everything a member request needs from one sealed payload.
#[derive(Debug, Clone)]
pub struct SealedPayload {
    pub plaintext: String,
    pub envelope: SignedEnvelope,
    pub signature: String,
}

impl SealedPayload {
    pub fn body(&self) -> Result<String, CodecError> {
        serde_json::to_string(&self.envelope).map_err(|e| CodecError::Serialize(e.to_string()))
    }
}

#[derive(Clone)]
pub struct PayloadCodec {
    key: [u8; BLOCK_SIZE],
}

impl fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCodec").finish_non_exhaustive()
    }
}

impl Default for PayloadCodec {
    fn default() -> Self {
        let mut key = [0u8; BLOCK_SIZE];
        key.copy_from_slice(&VENDOR_KEY_MATERIAL.as_bytes()[..BLOCK_SIZE]);
        Self { key }
    }
}

impl PayloadCodec {
    /// Builds a codec from key material, keeping only its first 16 bytes.
    pub fn new(key_material: &[u8]) -> Result<Self, CodecError> {
        if key_material.len() < BLOCK_SIZE {
            return Err(CodecError::InvalidKey(key_material.len()));
        }
        let mut key = [0u8; BLOCK_SIZE];
        key.copy_from_slice(&key_material[..BLOCK_SIZE]);
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        let ciphertext = Aes128EcbEnc::new(GenericArray::from_slice(&self.key))
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        STANDARD.encode(ciphertext)
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CodecError> {
        let buf = STANDARD
            .decode(ciphertext)
            .map_err(|e| CodecError::Base64(e.to_string()))?;

        if buf.len() % BLOCK_SIZE != 0 {
            return Err(CodecError::InvalidBlockLength(buf.len()));
        }

        Aes128EcbDec::new(GenericArray::from_slice(&self.key))
            .decrypt_padded_vec_mut::<Pkcs7>(&buf)
            .map_err(|_| CodecError::InvalidPadding)
    }

    /// Serializes `payload`, encrypts it into an envelope and signs the plaintext.
    pub fn seal<T: Serialize>(&self, payload: &T) -> Result<SealedPayload, CodecError> {
        let plaintext =
            serde_json::to_string(payload).map_err(|e| CodecError::Serialize(e.to_string()))?;

        let envelope = SignedEnvelope {
            service_version: ENVELOPE_SERVICE_VERSION,
            encrypted_payload: self.encrypt(plaintext.as_bytes()),
            transport_key: ENVELOPE_TRANSPORT_KEY.to_string(),
        };
        let signature = sign(&plaintext, REQDATA_SALT);

        Ok(SealedPayload {
            plaintext,
            envelope,
            signature,
        })
    }

    /// Reverses `seal`: parses an envelope body and returns the decrypted plaintext.
    pub fn open(&self, body: &str) -> Result<String, CodecError> {
        let envelope: SignedEnvelope =
            serde_json::from_str(body).map_err(|e| CodecError::Serialize(e.to_string()))?;
        let plain = self.decrypt(&envelope.encrypted_payload)?;
        String::from_utf8(plain).map_err(|e| CodecError::Serialize(e.to_string()))
    }
}

pub fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// hex(MD5(plaintext + salt))
pub fn sign(plaintext: &str, salt: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(plaintext.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Signature placed in the member API request header.
pub fn digital_sign(
    account_id: &str,
    req_time: &str,
    service_name: &str,
    version: &str,
    account_key: &str,
) -> String {
    md5_hex(&format!(
        "AccountID={account_id}&ReqTime={req_time}&ServiceName={service_name}&Version={version}{account_key}"
    ))
}

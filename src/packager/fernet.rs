//! Fernet authenticated encryption.
//!
//! Token layout: `0x80 | timestamp (u64 BE) | IV (16) | AES-128-CBC ciphertext | HMAC-SHA256 (32)`,
//! url-safe base64 encoded with padding. The first half of the 32-byte key
//! signs, the second half encrypts.

use std::time::Duration;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use super::PackError;

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const VERSION: u8 = 0x80;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;
const HEADER_LEN: usize = 1 + 8 + IV_LEN;
const BLOCK_LEN: usize = 16;

/// Pre-shared symmetric key
#[derive(Clone)]
pub struct Fernet {
    signing_key: [u8; 16],
    encryption_key: [u8; 16],
}

impl std::fmt::Debug for Fernet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Fernet { .. }")
    }
}

impl Fernet {
    /// Parse a url-safe base64 key of 32 bytes (padding optional).
    pub fn new(key: &str) -> Result<Self, PackError> {
        let trimmed = key.trim();
        let bytes = URL_SAFE
            .decode(trimmed)
            .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed.trim_end_matches('=')))
            .map_err(|e| PackError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PackError> {
        if bytes.len() != KEY_LEN {
            return Err(PackError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut signing_key = [0u8; 16];
        let mut encryption_key = [0u8; 16];
        signing_key.copy_from_slice(&bytes[..16]);
        encryption_key.copy_from_slice(&bytes[16..]);
        Ok(Self {
            signing_key,
            encryption_key,
        })
    }

    /// Generate a fresh random key, base64 encoded.
    pub fn generate_key() -> String {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE.encode(bytes)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, PackError> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        self.encrypt_at(plaintext, now_secs(), iv)
    }

    fn encrypt_at(&self, plaintext: &[u8], timestamp: u64, iv: [u8; IV_LEN]) -> Result<String, PackError> {
        let ciphertext = Aes128CbcEnc::new_from_slices(&self.encryption_key, &iv)
            .map_err(|e| PackError::Encrypt(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut token = Vec::with_capacity(HEADER_LEN + ciphertext.len() + TAG_LEN);
        token.push(VERSION);
        token.extend_from_slice(&timestamp.to_be_bytes());
        token.extend_from_slice(&iv);
        token.extend_from_slice(&ciphertext);

        let tag = self.mac()?.chain_update(&token).finalize().into_bytes();
        token.extend_from_slice(&tag);

        Ok(URL_SAFE.encode(token))
    }

    /// Verify and decrypt a token. With `ttl`, tokens older than it are rejected.
    pub fn decrypt(&self, token: &str, ttl: Option<Duration>) -> Result<Vec<u8>, PackError> {
        self.decrypt_at(token, ttl, now_secs())
    }

    fn decrypt_at(&self, token: &str, ttl: Option<Duration>, now: u64) -> Result<Vec<u8>, PackError> {
        let data = URL_SAFE
            .decode(token.trim())
            .map_err(|_| PackError::InvalidToken("not url-safe base64"))?;

        if data.len() < HEADER_LEN + BLOCK_LEN + TAG_LEN {
            return Err(PackError::InvalidToken("token too short"));
        }
        if data[0] != VERSION {
            return Err(PackError::InvalidToken("unknown version"));
        }

        let (signed, tag) = data.split_at(data.len() - TAG_LEN);
        self.mac()?
            .chain_update(signed)
            .verify_slice(tag)
            .map_err(|_| PackError::InvalidToken("signature mismatch"))?;

        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&signed[1..9]);
        let timestamp = u64::from_be_bytes(ts_bytes);
        if let Some(ttl) = ttl {
            if timestamp.saturating_add(ttl.as_secs()) < now {
                return Err(PackError::InvalidToken("token expired"));
            }
        }

        let iv = &signed[9..HEADER_LEN];
        let ciphertext = &signed[HEADER_LEN..];
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(PackError::InvalidToken("ciphertext not block aligned"));
        }

        Aes128CbcDec::new_from_slices(&self.encryption_key, iv)
            .map_err(|_| PackError::InvalidToken("bad iv"))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| PackError::InvalidToken("bad padding"))
    }

    fn mac(&self) -> Result<HmacSha256, PackError> {
        HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| PackError::InvalidKey(e.to_string()))
    }
}

fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Vector from the Fernet specification
    const SPEC_KEY: &str = "cw_0x689RpI-jtRR7oE8h_eQsKImvJapLeSbXpwF4e4=";
    const SPEC_TOKEN: &str = "gAAAAAAdwJ6wAAECAwQFBgcICQoLDA0ODy021cpGVWKZ_eEwCGM4BLLF_5CV9dOPmrhuVUPgJobwOz7JcbmrR64jVmpU4IwqDA==";
    const SPEC_TIMESTAMP: u64 = 499_162_800;

    fn spec_iv() -> [u8; IV_LEN] {
        let mut iv = [0u8; IV_LEN];
        for (i, byte) in iv.iter_mut().enumerate() {
            *byte = i as u8;
        }
        iv
    }

    #[test]
    fn test_known_answer_encrypt() {
        let fernet = Fernet::new(SPEC_KEY).unwrap();
        let token = fernet.encrypt_at(b"hello", SPEC_TIMESTAMP, spec_iv()).unwrap();
        assert_eq!(token, SPEC_TOKEN);
    }

    #[test]
    fn test_known_answer_decrypt() {
        let fernet = Fernet::new(SPEC_KEY).unwrap();
        let plain = fernet.decrypt(SPEC_TOKEN, None).unwrap();
        assert_eq!(plain, b"hello");
    }

    #[test]
    fn test_roundtrip_with_random_key() {
        let fernet = Fernet::new(&Fernet::generate_key()).unwrap();
        let token = fernet.encrypt(b"some compressed bytes \x00\xff").unwrap();
        assert_eq!(
            fernet.decrypt(&token, None).unwrap(),
            b"some compressed bytes \x00\xff"
        );
    }

    #[test]
    fn test_tampered_token_rejected() {
        let fernet = Fernet::new(SPEC_KEY).unwrap();
        let mut raw = URL_SAFE.decode(SPEC_TOKEN).unwrap();
        let last = raw.len() - TAG_LEN - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE.encode(raw);

        let err = fernet.decrypt(&tampered, None).unwrap_err();
        assert!(matches!(err, PackError::InvalidToken("signature mismatch")));
    }

    #[test]
    fn test_every_byte_flip_rejected() {
        let fernet = Fernet::new(SPEC_KEY).unwrap();
        let raw = URL_SAFE.decode(SPEC_TOKEN).unwrap();
        for index in 0..raw.len() {
            let mut copy = raw.clone();
            copy[index] ^= 0x80;
            assert!(fernet.decrypt(&URL_SAFE.encode(&copy), None).is_err());
        }
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = Fernet::new(SPEC_KEY).unwrap().encrypt(b"secret").unwrap();
        let other = Fernet::new(&Fernet::generate_key()).unwrap();
        assert!(other.decrypt(&token, None).is_err());
    }

    #[test]
    fn test_ttl_expiry() {
        let fernet = Fernet::new(SPEC_KEY).unwrap();
        let ttl = Some(Duration::from_secs(60));
        assert!(fernet
            .decrypt_at(SPEC_TOKEN, ttl, SPEC_TIMESTAMP + 30)
            .is_ok());
        let err = fernet
            .decrypt_at(SPEC_TOKEN, ttl, SPEC_TIMESTAMP + 61)
            .unwrap_err();
        assert!(matches!(err, PackError::InvalidToken("token expired")));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            Fernet::new("not base64!!"),
            Err(PackError::InvalidKey(_))
        ));
        assert!(matches!(
            Fernet::new(&URL_SAFE.encode([0u8; 16])),
            Err(PackError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_short_token_rejected() {
        let fernet = Fernet::new(SPEC_KEY).unwrap();
        assert!(matches!(
            fernet.decrypt("gAAA", None),
            Err(PackError::InvalidToken(_))
        ));
    }
}

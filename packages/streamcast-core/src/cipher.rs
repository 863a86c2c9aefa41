//! AES-128-CBC session cipher.
//!
//! An 18-byte unencrypted header (`flags: u16` network order, then a
//! 16-byte IV) is followed by an encrypted region that starts with a
//! `u32` (network order) cleartext length, then the cleartext itself, the
//! whole region padded with PKCS7-less zero padding up to a multiple of
//! 16 bytes. `flags` is always `FLAGS_SCHEME_CBC | FLAGS_SINGLE_FRAGMENT`
//! (`1`); any other value is rejected on decrypt.

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{StreamError, StreamResult};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const FLAGS_SCHEME_CBC: u16 = 0x0001;
const FLAGS_SINGLE_FRAGMENT: u16 = 0x0000;
const SUPPORTED_FLAGS: u16 = FLAGS_SCHEME_CBC | FLAGS_SINGLE_FRAGMENT;
const IV_LEN: usize = 16;
const HEADER_LEN: usize = 2 + IV_LEN;
const LEN_PREFIX: usize = 4;
const BLOCK_SIZE: usize = 16;

/// Rounds `n` up to the next multiple of 16 (an exact multiple maps to
/// itself).
#[must_use]
pub fn aligned_size(n: usize) -> usize {
    if n == 0 {
        return BLOCK_SIZE;
    }
    ((n - 1) - (n - 1) % BLOCK_SIZE) + BLOCK_SIZE
}

/// Size of the ciphertext buffer needed to hold `n` bytes of cleartext,
/// including the unencrypted header.
#[must_use]
pub fn cipher_text_buffer_size(n: usize) -> usize {
    aligned_size(n + LEN_PREFIX) + HEADER_LEN
}

/// A session's symmetric cipher, derived once from a shared passphrase (and
/// optional salt) and reused for every message on that session.
#[derive(Clone)]
pub struct SessionCipher {
    key: [u8; 16],
}

impl SessionCipher {
    /// Derives a session cipher from a passphrase and optional salt.
    ///
    /// Key = first 16 bytes of `SHA256(salt ‖ passphrase)`.
    #[must_use]
    pub fn derive(passphrase: &str, salt: Option<&[u8]>) -> Self {
        let mut hasher = Sha256::new();
        if let Some(salt) = salt {
            hasher.update(salt);
        }
        hasher.update(passphrase.as_bytes());
        let digest = hasher.finalize();
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[..16]);
        Self { key }
    }

    /// Encrypts `plaintext`, returning the full wire buffer (header +
    /// ciphertext).
    pub fn encrypt(&self, plaintext: &[u8]) -> StreamResult<Vec<u8>> {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);

        let region_len = plaintext.len() + LEN_PREFIX;
        let padded_len = aligned_size(region_len);

        let mut region = Vec::with_capacity(padded_len);
        region.extend_from_slice(&(plaintext.len() as u32).to_be_bytes());
        region.extend_from_slice(plaintext);
        region.resize(padded_len, 0);

        let encryptor = Aes128CbcEnc::new(&self.key.into(), &iv.into());
        let ciphertext = encryptor
            .encrypt_padded_vec_mut::<NoPadding>(&region);

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.extend_from_slice(&SUPPORTED_FLAGS.to_be_bytes());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts a wire buffer produced by [`SessionCipher::encrypt`].
    pub fn decrypt(&self, wire: &[u8]) -> StreamResult<Vec<u8>> {
        if wire.len() < HEADER_LEN {
            return Err(StreamError::InvalidArg("ciphertext shorter than header".into()));
        }
        let flags = u16::from_be_bytes([wire[0], wire[1]]);
        if flags != SUPPORTED_FLAGS {
            return Err(StreamError::InvalidArg(format!("unsupported cipher flags: {flags:#06x}")));
        }
        let iv: [u8; IV_LEN] = wire[2..2 + IV_LEN].try_into().unwrap();
        let region = &wire[HEADER_LEN..];
        if region.is_empty() || region.len() % BLOCK_SIZE != 0 {
            return Err(StreamError::InvalidArg("ciphertext region is not block-aligned".into()));
        }

        let decryptor = Aes128CbcDec::new(&self.key.into(), &iv.into());
        let mut buf = region.to_vec();
        let plain = decryptor
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| StreamError::InvalidArg("cipher padding error".into()))?;

        if plain.len() < LEN_PREFIX {
            return Err(StreamError::InvalidArg("decrypted region too short for length prefix".into()));
        }
        let org_size = u32::from_be_bytes(plain[..LEN_PREFIX].try_into().unwrap()) as usize;
        let cleartext = plain.get(LEN_PREFIX..).unwrap_or(&[]);
        if org_size > cleartext.len() {
            return Err(StreamError::InvalidArg("declared cleartext size exceeds decrypted region".into()));
        }
        Ok(cleartext[..org_size].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_size_rounds_up_to_16() {
        assert_eq!(aligned_size(1), 16);
        assert_eq!(aligned_size(16), 32);
        assert_eq!(aligned_size(17), 32);
        assert_eq!(aligned_size(32), 48);
    }

    #[test]
    fn cipher_text_buffer_size_is_always_n_plus_18_or_more_and_block_aligned() {
        for n in [0usize, 1, 15, 16, 17, 1000] {
            let size = cipher_text_buffer_size(n);
            assert!(size >= n + 18, "size {size} too small for n {n}");
            assert_eq!((size - 18) % 16, 0);
        }
    }

    #[test]
    fn round_trips_arbitrary_plaintext() {
        let cipher = SessionCipher::derive("correct horse battery staple", None);
        for plaintext in [&b""[..], b"hi", b"exactly16bytes!!", b"a longer message that spans several aes blocks of data"] {
            let wire = cipher.encrypt(plaintext).unwrap();
            let recovered = cipher.decrypt(&wire).unwrap();
            assert_eq!(recovered, plaintext);
        }
    }

    #[test]
    fn rejects_unsupported_flags() {
        let cipher = SessionCipher::derive("pw", None);
        let mut wire = cipher.encrypt(b"hello").unwrap();
        wire[0..2].copy_from_slice(&0xFFFFu16.to_be_bytes());
        assert!(cipher.decrypt(&wire).is_err());
    }

    #[test]
    fn different_salts_derive_different_keys() {
        let a = SessionCipher::derive("pw", Some(b"salt-a"));
        let b = SessionCipher::derive("pw", Some(b"salt-b"));
        let wire = a.encrypt(b"hello").unwrap();
        assert!(b.decrypt(&wire).is_err() || b.decrypt(&wire).unwrap() != b"hello");
    }

    #[test]
    fn each_encryption_uses_a_fresh_iv() {
        let cipher = SessionCipher::derive("pw", None);
        let a = cipher.encrypt(b"hello").unwrap();
        let b = cipher.encrypt(b"hello").unwrap();
        assert_ne!(a, b, "ciphertexts for identical plaintext must differ (fresh IV)");
    }
}

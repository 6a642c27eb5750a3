//! A Fernet-equivalent authenticated encryption scheme for ownership marker content.
//!
//! Key derivation and token layout intentionally mirror Python's `cryptography.fernet.Fernet`
//! so that markers written by either implementation can be read by the other:
//! - key: PBKDF2-HMAC-SHA256, fixed salt `sherpa-dns`, 100_000 iterations, 32-byte output,
//!   split into a 16-byte signing key and a 16-byte encryption key.
//! - token: `version(1) || timestamp(8, big-endian) || iv(16) || ciphertext || hmac-sha256(32)`,
//!   base64-urlsafe encoded.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::URL_SAFE, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

const PBKDF2_SALT: &[u8] = b"sherpa-dns";
const PBKDF2_ITERATIONS: u32 = 100_000;
const FERNET_VERSION: u8 = 0x80;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("ciphertext is not validly base64-encoded")]
    InvalidBase64,
    #[error("ciphertext is too short to be a valid token")]
    Truncated,
    #[error("unsupported token version")]
    UnsupportedVersion,
    #[error("HMAC signature did not verify")]
    InvalidSignature,
    #[error("ciphertext padding was invalid")]
    InvalidPadding,
}

struct DerivedKey {
    signing_key: [u8; 16],
    encryption_key: [u8; 16],
}

fn derive_key(passphrase: &str) -> DerivedKey {
    let mut derived = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), PBKDF2_SALT, PBKDF2_ITERATIONS, &mut derived);
    let mut signing_key = [0u8; 16];
    let mut encryption_key = [0u8; 16];
    signing_key.copy_from_slice(&derived[..16]);
    encryption_key.copy_from_slice(&derived[16..]);
    DerivedKey {
        signing_key,
        encryption_key,
    }
}

/// Encrypts `plaintext` with the key derived from `passphrase`, returning the base64-urlsafe
/// token body (without the `v1:AES256:` envelope prefix - callers add that).
pub fn encrypt(passphrase: &str, plaintext: &str, unix_timestamp: u64) -> String {
    let key = derive_key(passphrase);
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = Aes128CbcEnc::new(&key.encryption_key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut body = Vec::with_capacity(1 + 8 + 16 + ciphertext.len());
    body.push(FERNET_VERSION);
    body.extend_from_slice(&unix_timestamp.to_be_bytes());
    body.extend_from_slice(&iv);
    body.extend_from_slice(&ciphertext);

    let mut mac = HmacSha256::new_from_slice(&key.signing_key).expect("hmac accepts any key length");
    mac.update(&body);
    body.extend_from_slice(&mac.finalize().into_bytes());

    URL_SAFE.encode(body)
}

/// Decrypts a token body produced by [`encrypt`]. Verifies the HMAC before decrypting.
pub fn decrypt(passphrase: &str, token: &str) -> Result<String, CryptoError> {
    let key = derive_key(passphrase);
    let raw = URL_SAFE.decode(token).map_err(|_| CryptoError::InvalidBase64)?;
    if raw.len() < 1 + 8 + 16 + 32 {
        return Err(CryptoError::Truncated);
    }
    let (signed_part, tag) = raw.split_at(raw.len() - 32);
    if signed_part[0] != FERNET_VERSION {
        return Err(CryptoError::UnsupportedVersion);
    }

    let mut mac = HmacSha256::new_from_slice(&key.signing_key).expect("hmac accepts any key length");
    mac.update(signed_part);
    mac.verify_slice(tag).map_err(|_| CryptoError::InvalidSignature)?;

    let iv = &signed_part[9..25];
    let ciphertext = &signed_part[25..];
    let plaintext = Aes128CbcDec::new(&key.encryption_key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::InvalidPadding)?;

    Ok(String::from_utf8_lossy(&plaintext).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let plaintext = "heritage=sherpa-dns,owner=default,resource=docker";
        let token = encrypt("correct horse battery staple", plaintext, 1_700_000_000);
        let recovered = decrypt("correct horse battery staple", &token).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn decrypt_rejects_wrong_key() {
        let token = encrypt("right-key", "hello", 0);
        assert_eq!(decrypt("wrong-key", &token), Err(CryptoError::InvalidSignature));
    }

    #[test]
    fn decrypt_rejects_garbage() {
        assert_eq!(decrypt("any-key", "not valid base64!!"), Err(CryptoError::InvalidBase64));
    }

    #[test]
    fn two_encryptions_of_the_same_plaintext_differ() {
        // Random IV per call, same semantics as Fernet.
        let a = encrypt("k", "same plaintext", 0);
        let b = encrypt("k", "same plaintext", 0);
        assert_ne!(a, b);
    }
}

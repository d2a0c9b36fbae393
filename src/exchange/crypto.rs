//! Credential encryption
//!
//! Store-held API credentials are AES-256-GCM encrypted with a key derived
//! from the operator passphrase via PBKDF2-SHA256. Wire format is
//! base64(salt[16] || nonce[12] || ciphertext).

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use anyhow::{anyhow, bail, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::Sha256;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PBKDF2_ROUNDS: u32 = 100_000;

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}

/// Decrypt a credential produced by [`encrypt_credential`].
pub fn decrypt_credential(payload_b64: &str, passphrase: &str) -> Result<String> {
    let payload = BASE64
        .decode(payload_b64)
        .map_err(|e| anyhow!("credential payload is not valid base64: {e}"))?;
    if payload.len() < SALT_LEN + NONCE_LEN + 1 {
        bail!("credential payload too short");
    }

    let (salt, rest) = payload.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(passphrase, salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| anyhow!("invalid credential key length"))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| anyhow!("credential decryption failed"))?;

    String::from_utf8(plaintext).map_err(|_| anyhow!("decrypted credential is not UTF-8"))
}

/// Encrypt a credential for storage.
pub fn encrypt_credential(plaintext: &str, passphrase: &str) -> Result<String> {
    let salt: [u8; SALT_LEN] = rand_bytes();
    let nonce: [u8; NONCE_LEN] = rand_bytes();

    let key = derive_key(passphrase, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| anyhow!("invalid credential key length"))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| anyhow!("credential encryption failed"))?;

    let mut payload = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(&salt);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(payload))
}

fn rand_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

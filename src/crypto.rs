// Symmetric primitives for the encryption core: the HMAC-SHA256 PRF used for
// token derivation and tag generation, plus the two ciphertext layouts
// (plain CTR for server-readable envelopes, CTR + HMAC encrypt-then-MAC for
// client value encryption).

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes256;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::errors::{Error, Result};
use crate::types::KeyMaterial;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// A 32-byte PRF (HMAC-SHA256) output block.
pub type PrfBlock = [u8; 32];

/// Length of the random IV prefixed to every ciphertext.
pub const IV_LEN: usize = 16;

/// Length of the authentication tag on AEAD ciphertexts.
pub const MAC_LEN: usize = 32;

/// HMAC-SHA256 of arbitrary data.
pub fn prf(key: &[u8], data: &[u8]) -> PrfBlock {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA256 of a little-endian u64 derivation label.
pub fn prf_u64(key: &[u8], value: u64) -> PrfBlock {
    prf(key, &value.to_le_bytes())
}

/// HMAC-SHA256 of two little-endian u64 words.
pub fn prf_u64_pair(key: &[u8], first: u64, second: u64) -> PrfBlock {
    let mut data = [0u8; 16];
    data[..8].copy_from_slice(&first.to_le_bytes());
    data[8..].copy_from_slice(&second.to_le_bytes());
    prf(key, &data)
}

fn ctr_apply(key: &[u8; 32], iv: &[u8; IV_LEN], buf: &mut [u8]) {
    let mut cipher = Aes256Ctr::new(key.into(), iv.into());
    cipher.apply_keystream(buf);
}

fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Encrypt with AES-256-CTR under a fresh random IV.
///
/// Output layout: `IV(16) || ciphertext`. No authentication: used only for
/// envelopes whose integrity is covered elsewhere (state-collection values,
/// server-side indexed-value envelopes).
pub fn fle2_encrypt(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    fle2_encrypt_with_iv(key, &random_iv(), plaintext)
}

pub fn fle2_encrypt_with_iv(key: &[u8; 32], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(IV_LEN + plaintext.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(plaintext);
    ctr_apply(key, iv, &mut out[IV_LEN..]);
    out
}

/// Invert [`fle2_encrypt`].
pub fn fle2_decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < IV_LEN {
        return Err(Error::ShortBuffer(format!(
            "ciphertext of {} bytes cannot hold an IV",
            ciphertext.len()
        )));
    }
    let iv: [u8; IV_LEN] = ciphertext[..IV_LEN].try_into().unwrap();
    let mut out = ciphertext[IV_LEN..].to_vec();
    ctr_apply(key, &iv, &mut out);
    Ok(out)
}

/// Authenticated encryption with AES-256-CTR + HMAC-SHA256 (encrypt-then-MAC)
/// under a fresh random IV.
///
/// The 96-byte key material supplies the cipher key (bytes 0..32) and the MAC
/// key (bytes 32..64). Output layout: `IV(16) || ciphertext || tag(32)` with
/// `tag = HMAC(mac_key, associated_data || IV || ciphertext)`.
pub fn fle2_aead_encrypt(key: &KeyMaterial, associated_data: &[u8], plaintext: &[u8]) -> Vec<u8> {
    fle2_aead_encrypt_with_iv(key, &random_iv(), associated_data, plaintext)
}

pub fn fle2_aead_encrypt_with_iv(
    key: &KeyMaterial,
    iv: &[u8; IV_LEN],
    associated_data: &[u8],
    plaintext: &[u8],
) -> Vec<u8> {
    let enc_key: &[u8; 32] = key.aead_encryption_key().try_into().unwrap();

    let mut out = Vec::with_capacity(IV_LEN + plaintext.len() + MAC_LEN);
    out.extend_from_slice(iv);
    out.extend_from_slice(plaintext);
    ctr_apply(enc_key, iv, &mut out[IV_LEN..]);

    let mut mac = HmacSha256::new_from_slice(key.aead_mac_key()).expect("mac key");
    mac.update(associated_data);
    mac.update(&out);
    let tag = mac.finalize().into_bytes();
    out.extend_from_slice(&tag);
    out
}

/// Invert [`fle2_aead_encrypt`], verifying the tag in constant time before
/// decrypting. A tag mismatch is fatal to the operation.
pub fn fle2_aead_decrypt(
    key: &KeyMaterial,
    associated_data: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < IV_LEN + MAC_LEN {
        return Err(Error::ShortBuffer(format!(
            "AEAD ciphertext of {} bytes is shorter than IV plus tag",
            ciphertext.len()
        )));
    }
    let (body, tag) = ciphertext.split_at(ciphertext.len() - MAC_LEN);

    let mut mac = HmacSha256::new_from_slice(key.aead_mac_key()).expect("mac key");
    mac.update(associated_data);
    mac.update(body);
    mac.verify_slice(tag)
        .map_err(|_| Error::IntegrityCheck("AEAD tag mismatch".into()))?;

    let iv: [u8; IV_LEN] = body[..IV_LEN].try_into().unwrap();
    let enc_key: &[u8; 32] = key.aead_encryption_key().try_into().unwrap();
    let mut out = body[IV_LEN..].to_vec();
    ctr_apply(enc_key, &iv, &mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> KeyMaterial {
        let mut raw = [0u8; 96];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = (i * 7) as u8;
        }
        KeyMaterial::new(raw).unwrap()
    }

    #[test]
    fn prf_is_deterministic() {
        let a = prf(b"key", b"data");
        let b = prf(b"key", b"data");
        assert_eq!(a, b);
        assert_ne!(a, prf(b"key", b"datb"));
    }

    #[test]
    fn ctr_round_trip() {
        let key = [9u8; 32];
        let plaintext = b"sixteen byte msg plus some extra";
        let ct = fle2_encrypt(&key, plaintext);
        assert_eq!(ct.len(), IV_LEN + plaintext.len());
        assert_eq!(fle2_decrypt(&key, &ct).unwrap(), plaintext);
    }

    #[test]
    fn ctr_rejects_short_buffers() {
        let key = [9u8; 32];
        assert!(fle2_decrypt(&key, &[0u8; 15]).is_err());
    }

    #[test]
    fn aead_round_trip() {
        let key = material();
        let ct = fle2_aead_encrypt(&key, b"header", b"secret payload");
        assert_eq!(
            fle2_aead_decrypt(&key, b"header", &ct).unwrap(),
            b"secret payload"
        );
    }

    #[test]
    fn aead_detects_tampering() {
        let key = material();
        let mut ct = fle2_aead_encrypt(&key, b"header", b"secret payload");
        // Flip one ciphertext bit.
        ct[IV_LEN] ^= 1;
        assert!(matches!(
            fle2_aead_decrypt(&key, b"header", &ct),
            Err(Error::IntegrityCheck(_))
        ));
    }

    #[test]
    fn aead_binds_associated_data() {
        let key = material();
        let ct = fle2_aead_encrypt(&key, b"header", b"secret payload");
        assert!(fle2_aead_decrypt(&key, b"other", &ct).is_err());
    }

    #[test]
    fn aead_rejects_truncation() {
        let key = material();
        let ct = fle2_aead_encrypt(&key, b"header", b"p");
        assert!(fle2_aead_decrypt(&key, b"header", &ct[..IV_LEN + MAC_LEN - 1]).is_err());
    }
}

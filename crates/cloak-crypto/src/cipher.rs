use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use des::Des;
use des::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};

use crate::error::CryptoError;
use crate::key::Key;

/// DES block size in bytes.
pub const BLOCK_SIZE: usize = 8;

/// Encrypt UTF-8 text under `key`. Returns base64 ciphertext.
///
/// PKCS#7 always appends padding: an already aligned plaintext gains a full
/// 8-byte block. Blocks are encrypted independently (ECB), so equal
/// plaintext blocks give equal ciphertext blocks.
pub fn encrypt(plaintext: &str, key: &Key) -> String {
    encrypt_bytes(plaintext.as_bytes(), key)
}

/// Decrypt base64 ciphertext under `key` back to UTF-8 text.
///
/// Invalid padding is tolerated: the decrypted bytes are used unstripped.
/// Only bad base64, a length that is not a positive multiple of 8, or
/// invalid UTF-8 in the result are errors.
pub fn decrypt(ciphertext: &str, key: &Key) -> Result<String, CryptoError> {
    let mut buf = BASE64
        .decode(ciphertext)
        .map_err(|e| CryptoError::Decode(format!("invalid base64: {}", e)))?;

    if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::Decode(format!(
            "ciphertext is {} bytes, expected a positive multiple of {}",
            buf.len(),
            BLOCK_SIZE
        )));
    }

    let cipher = des_for(key);
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }

    let plain = pkcs7_unpad(&buf);
    String::from_utf8(plain.to_vec())
        .map_err(|e| CryptoError::Decode(format!("plaintext is not UTF-8: {}", e)))
}

pub(crate) fn encrypt_bytes(plain: &[u8], key: &Key) -> String {
    let mut buf = pkcs7_pad(plain);

    let cipher = des_for(key);
    for block in buf.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }

    BASE64.encode(&buf)
}

fn des_for(key: &Key) -> Des {
    Des::new(GenericArray::from_slice(key.as_bytes()))
}

/// Pad to a multiple of `BLOCK_SIZE`. Padding length is always in 1..=8.
fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

/// Strip PKCS#7 padding, or return `data` unchanged if the padding is invalid.
fn pkcs7_unpad(data: &[u8]) -> &[u8] {
    let Some(&last) = data.last() else {
        return data;
    };
    let pad = last as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return data;
    }

    let (body, padding) = data.split_at(data.len() - pad);
    if padding.iter().all(|&b| b == last) {
        body
    } else {
        data
    }
}

//! Cryptographic primitives for O5LOGON authentication.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::Hmac;
use md5::Md5;
use pbkdf2::pbkdf2;
use sha1::Sha1;
use sha2::Sha512;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;

/// Encrypt with AES-CBC and an all-zero IV, as the server expects.
///
/// Padding is always added: PKCS7 by default, zero bytes when requested.
pub fn encrypt_cbc(key: &[u8], plaintext: &[u8], use_zero_padding: bool) -> Vec<u8> {
    let iv = [0u8; 16];
    let block_size = 16;

    let mut padded = plaintext.to_vec();
    let padding_needed = block_size - (padded.len() % block_size);
    if use_zero_padding {
        padded.extend(vec![0u8; padding_needed]);
    } else {
        padded.extend(vec![padding_needed as u8; padding_needed]);
    }

    match key.len() {
        32 => {
            let encryptor = Aes256CbcEnc::new(key.into(), &iv.into());
            let mut buf = padded.clone();
            encryptor
                .encrypt_padded_mut::<NoPadding>(&mut buf, padded.len())
                .expect("encryption failed");
            buf
        }
        24 => {
            let encryptor = Aes192CbcEnc::new(key.into(), &iv.into());
            let mut buf = padded.clone();
            encryptor
                .encrypt_padded_mut::<NoPadding>(&mut buf, padded.len())
                .expect("encryption failed");
            buf
        }
        _ => panic!("invalid AES key length: {}", key.len()),
    }
}

/// Decrypt with AES-CBC and an all-zero IV.
pub fn decrypt_cbc(key: &[u8], ciphertext: &[u8]) -> Vec<u8> {
    let iv = [0u8; 16];

    match key.len() {
        32 => {
            let decryptor = Aes256CbcDec::new(key.into(), &iv.into());
            let mut buf = ciphertext.to_vec();
            decryptor
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .expect("decryption failed")
                .to_vec()
        }
        24 => {
            let decryptor = Aes192CbcDec::new(key.into(), &iv.into());
            let mut buf = ciphertext.to_vec();
            decryptor
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .expect("decryption failed")
                .to_vec()
        }
        _ => panic!("invalid AES key length: {}", key.len()),
    }
}

/// Derive a key with PBKDF2-HMAC-SHA512.
pub fn derive_key_pbkdf2(password: &[u8], salt: &[u8], length: usize, iterations: u32) -> Vec<u8> {
    let mut key = vec![0u8; length];
    pbkdf2::<Hmac<Sha512>>(password, salt, iterations, &mut key).expect("PBKDF2 failed");
    key
}

/// SHA-1 digest.
pub fn sha1_hash(data: &[u8]) -> [u8; 20] {
    use sha1::Digest;
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-512 digest.
pub fn sha512_hash(data: &[u8]) -> [u8; 64] {
    use sha2::Digest;
    let mut hasher = Sha512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// MD5 digest.
pub fn md5_hash(data: &[u8]) -> [u8; 16] {
    use md5::Digest;
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Cryptographically secure random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Uppercase hex encoding.
pub fn bytes_to_hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Hex decoding; `None` on malformed input.
pub fn hex_to_bytes(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

//! OpenSSL traditional encrypted PEM (`Proc-Type: 4,ENCRYPTED`).
//!
//! The body is a PKCS#1 private key encrypted in CBC mode with PKCS#7
//! padding. The cipher key is derived with OpenSSL's `EVP_BytesToKey`: MD5,
//! one iteration, salted with the first 8 bytes of the IV from `DEK-Info`.

use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockCipher, BlockDecryptMut, KeyInit, KeyIvInit};
use des::TdesEde3;
use md5::{Digest, Md5};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::RsaPrivateKey;
use zeroize::Zeroizing;

use crate::keys::malformed;
use publicpillar_common::{Error, KeyError, Result};

const DEK_INFO_HEADER: &str = "DEK-Info";
const SALT_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DekCipher {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    DesEde3Cbc,
}

impl DekCipher {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "AES-128-CBC" => Some(DekCipher::Aes128Cbc),
            "AES-192-CBC" => Some(DekCipher::Aes192Cbc),
            "AES-256-CBC" => Some(DekCipher::Aes256Cbc),
            "DES-EDE3-CBC" => Some(DekCipher::DesEde3Cbc),
            _ => None,
        }
    }

    fn key_len(self) -> usize {
        match self {
            DekCipher::Aes128Cbc => 16,
            DekCipher::Aes192Cbc | DekCipher::DesEde3Cbc => 24,
            DekCipher::Aes256Cbc => 32,
        }
    }

    /// Block size, which is also the IV length.
    fn block_len(self) -> usize {
        match self {
            DekCipher::DesEde3Cbc => 8,
            _ => 16,
        }
    }

    /// Decrypt `buf` in place, returning the unpadded length.
    fn decrypt(self, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Option<usize> {
        match self {
            DekCipher::Aes128Cbc => cbc_decrypt::<Aes128>(key, iv, buf),
            DekCipher::Aes192Cbc => cbc_decrypt::<Aes192>(key, iv, buf),
            DekCipher::Aes256Cbc => cbc_decrypt::<Aes256>(key, iv, buf),
            DekCipher::DesEde3Cbc => cbc_decrypt::<TdesEde3>(key, iv, buf),
        }
    }
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Option<usize>
where
    C: BlockCipher + BlockDecryptMut + KeyInit,
{
    let decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv).ok()?;
    decryptor
        .decrypt_padded_mut::<Pkcs7>(buf)
        .ok()
        .map(|plaintext| plaintext.len())
}

/// `EVP_BytesToKey` with MD5 and a single iteration.
fn bytes_to_key(passphrase: &[u8], salt: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(Vec::with_capacity(len + 16));
    let mut previous = None;

    while key.len() < len {
        let mut hasher = Md5::new();
        if let Some(block) = &previous {
            hasher.update(block);
        }
        hasher.update(passphrase);
        hasher.update(salt);
        let block = hasher.finalize();
        key.extend_from_slice(&block);
        previous = Some(block);
    }

    key.truncate(len);
    key
}

/// Decrypt a `Proc-Type: 4,ENCRYPTED` `RSA PRIVATE KEY` block.
///
/// # Errors
/// - `InvalidKey(Malformed)` for a missing or unsupported `DEK-Info`, or a
///   damaged body
/// - `InvalidKey(IncorrectPassphrase)` if the padding or the decrypted key
///   does not check out
pub(crate) fn decrypt(pem: &str, passphrase: &str) -> Result<RsaPrivateKey> {
    let mut dek_info = None;
    let mut body = String::new();

    let block = pem
        .lines()
        .map(str::trim)
        .skip_while(|line| !line.starts_with("-----BEGIN "))
        .skip(1)
        .take_while(|line| !line.starts_with("-----END "));
    for line in block {
        match line.split_once(':') {
            Some((name, value)) if name.trim() == DEK_INFO_HEADER => dek_info = Some(value.trim()),
            Some(_) => {}
            None => body.push_str(line),
        }
    }

    let dek_info = dek_info.ok_or_else(|| malformed("encrypted PEM has no DEK-Info header"))?;
    let (name, iv_hex) = dek_info
        .split_once(',')
        .ok_or_else(|| malformed(format!("invalid DEK-Info '{}'", dek_info)))?;
    let cipher = DekCipher::from_name(name.trim())
        .ok_or_else(|| malformed(format!("unsupported PEM cipher '{}'", name.trim())))?;

    let iv = hex::decode(iv_hex.trim()).map_err(|e| malformed(format!("DEK-Info IV: {}", e)))?;
    if iv.len() != cipher.block_len() {
        return Err(malformed(format!(
            "DEK-Info IV is {} bytes, expected {}",
            iv.len(),
            cipher.block_len()
        )));
    }

    let mut data = Zeroizing::new(
        STANDARD
            .decode(body.as_bytes())
            .map_err(|e| malformed(format!("encrypted PEM body: {}", e)))?,
    );
    if data.is_empty() || data.len() % cipher.block_len() != 0 {
        return Err(malformed("encrypted PEM body is not a whole number of blocks"));
    }

    let key = bytes_to_key(passphrase.as_bytes(), &iv[..SALT_LEN], cipher.key_len());
    let len = cipher
        .decrypt(&key, &iv, &mut data)
        .ok_or(KeyError::IncorrectPassphrase)?;

    RsaPrivateKey::from_pkcs1_der(&data[..len])
        .map_err(|_| Error::InvalidKey(KeyError::IncorrectPassphrase))
}

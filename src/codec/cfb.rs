//! AES-256 in 128-bit cipher feedback mode. No authentication: a wrong
//! password or a damaged file decrypts to garbage rather than failing.

use aes::Aes256;
use cfb_mode::cipher::KeyIvInit;
use cfb_mode::{BufDecryptor, BufEncryptor};

use super::{CipherCodec, StreamDecryptor, StreamEncryptor, check_nonce};
use crate::error::{ErrorCategory, ErrorKind, GfglockError, Result};
use crate::format::Algorithm;
use crate::kdf::KEY_LEN;

#[derive(Debug, Clone, Copy, Default)]
pub struct CfbCodec;

fn invalid_iv() -> GfglockError {
    GfglockError::with_kind(
        ErrorCategory::Internal,
        ErrorKind::InternalInvariant,
        "invalid AES-CFB key or IV length",
    )
}

struct CfbEncryptor(BufEncryptor<Aes256>);

impl StreamEncryptor for CfbEncryptor {
    fn update(&mut self, buf: &mut [u8]) -> Result<()> {
        self.0.encrypt(buf);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        Vec::new()
    }
}

struct CfbDecryptor(BufDecryptor<Aes256>);

impl StreamDecryptor for CfbDecryptor {
    fn update(&mut self, buf: &mut [u8]) -> Result<()> {
        self.0.decrypt(buf);
        Ok(())
    }

    fn finish(self: Box<Self>, tag: &[u8]) -> Result<()> {
        if !tag.is_empty() {
            return Err(GfglockError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "AES-CFB carries no tag",
            ));
        }
        Ok(())
    }
}

impl CipherCodec for CfbCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Aes256Cfb
    }

    fn encrypt_stream(&self, key: &[u8; KEY_LEN], iv: &[u8]) -> Result<Box<dyn StreamEncryptor>> {
        check_nonce(Algorithm::Aes256Cfb, iv)?;
        let inner = BufEncryptor::<Aes256>::new_from_slices(key, iv).map_err(|_| invalid_iv())?;
        Ok(Box::new(CfbEncryptor(inner)))
    }

    fn decrypt_stream(&self, key: &[u8; KEY_LEN], iv: &[u8]) -> Result<Box<dyn StreamDecryptor>> {
        check_nonce(Algorithm::Aes256Cfb, iv)?;
        let inner = BufDecryptor::<Aes256>::new_from_slices(key, iv).map_err(|_| invalid_iv())?;
        Ok(Box::new(CfbDecryptor(inner)))
    }
}

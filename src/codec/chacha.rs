//! ChaCha20-Poly1305 (RFC 8439) as a stream, with empty associated data.

use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use poly1305::Poly1305;
use poly1305::universal_hash::{KeyInit, UniversalHash};
use zeroize::Zeroizing;

use super::{
    CipherCodec, PaddedMac, StreamDecryptor, StreamEncryptor, authentication_failed, check_nonce,
    keystream_exhausted,
};
use crate::error::Result;
use crate::format::{Algorithm, TAG_LEN};
use crate::kdf::KEY_LEN;

#[derive(Debug, Clone, Copy, Default)]
pub struct ChaChaCodec;

struct ChaChaState {
    cipher: ChaCha20,
    poly: PaddedMac<Poly1305>,
}

impl ChaChaState {
    fn new(key: &[u8; KEY_LEN], nonce: &[u8]) -> Result<Self> {
        check_nonce(Algorithm::ChaCha20Poly1305, nonce)?;

        let mut cipher = ChaCha20::new(
            chacha20::Key::from_slice(key),
            chacha20::Nonce::from_slice(nonce),
        );

        // Block 0 keys Poly1305; the payload keystream starts at block 1.
        let mut block0 = Zeroizing::new([0u8; 64]);
        cipher.apply_keystream(block0.as_mut());
        let poly = Poly1305::new(poly1305::Key::from_slice(&block0[..32]));

        Ok(Self {
            cipher,
            poly: PaddedMac::new(poly),
        })
    }

    fn apply_keystream(&mut self, buf: &mut [u8]) -> Result<()> {
        self.cipher
            .try_apply_keystream(buf)
            .map_err(|_| keystream_exhausted(Algorithm::ChaCha20Poly1305))
    }

    fn finalize(self) -> Poly1305 {
        let (mut poly, ct_len) = self.poly.finish();
        let mut lengths = [0u8; 16];
        lengths[8..].copy_from_slice(&ct_len.to_le_bytes());
        poly.update_padded(&lengths);
        poly
    }
}

struct ChaChaEncryptor(ChaChaState);

impl StreamEncryptor for ChaChaEncryptor {
    fn update(&mut self, buf: &mut [u8]) -> Result<()> {
        self.0.apply_keystream(buf)?;
        self.0.poly.absorb(buf);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().finalize().to_vec()
    }
}

struct ChaChaDecryptor(ChaChaState);

impl StreamDecryptor for ChaChaDecryptor {
    fn update(&mut self, buf: &mut [u8]) -> Result<()> {
        self.0.poly.absorb(buf);
        self.0.apply_keystream(buf)
    }

    fn finish(self: Box<Self>, tag: &[u8]) -> Result<()> {
        if tag.len() != TAG_LEN {
            return Err(authentication_failed());
        }
        self.0
            .finalize()
            .verify(poly1305::Block::from_slice(tag))
            .map_err(|_| authentication_failed())
    }
}

impl CipherCodec for ChaChaCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::ChaCha20Poly1305
    }

    fn encrypt_stream(&self, key: &[u8; KEY_LEN], nonce: &[u8]) -> Result<Box<dyn StreamEncryptor>> {
        Ok(Box::new(ChaChaEncryptor(ChaChaState::new(key, nonce)?)))
    }

    fn decrypt_stream(&self, key: &[u8; KEY_LEN], nonce: &[u8]) -> Result<Box<dyn StreamDecryptor>> {
        Ok(Box::new(ChaChaDecryptor(ChaChaState::new(key, nonce)?)))
    }
}

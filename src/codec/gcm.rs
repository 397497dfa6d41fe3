//! AES-256-GCM as a stream.
//!
//! Built from the AES block cipher, a 32-bit big-endian counter and GHASH,
//! laid out exactly as NIST SP 800-38D with a 96-bit IV and no associated
//! data. Output is byte-for-byte what a one-shot GCM would produce over the
//! concatenation of all updates.

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use ctr::Ctr32BE;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ghash::GHash;
use ghash::universal_hash::UniversalHash;

use super::{
    CipherCodec, PaddedMac, StreamDecryptor, StreamEncryptor, authentication_failed, check_nonce,
    keystream_exhausted,
};
use crate::error::Result;
use crate::format::{Algorithm, TAG_LEN};
use crate::kdf::KEY_LEN;

#[derive(Debug, Clone, Copy, Default)]
pub struct GcmCodec;

struct GcmState {
    ctr: Ctr32BE<Aes256>,
    ghash: PaddedMac<GHash>,
    tag_mask: aes::Block,
}

impl GcmState {
    fn new(key: &[u8; KEY_LEN], nonce: &[u8]) -> Result<Self> {
        check_nonce(Algorithm::Aes256Gcm, nonce)?;

        let key = GenericArray::from_slice(key);
        let cipher = Aes256::new(key);

        let mut hash_key = aes::Block::default();
        cipher.encrypt_block(&mut hash_key);

        let mut j0 = aes::Block::default();
        j0[..nonce.len()].copy_from_slice(nonce);
        j0[15] = 1;

        let mut tag_mask = j0;
        cipher.encrypt_block(&mut tag_mask);

        let mut counter = j0;
        counter[15] = 2;

        Ok(Self {
            ctr: Ctr32BE::<Aes256>::new(key, &counter),
            ghash: PaddedMac::new(GHash::new(&hash_key)),
            tag_mask,
        })
    }

    fn apply_keystream(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ctr
            .try_apply_keystream(buf)
            .map_err(|_| keystream_exhausted(Algorithm::Aes256Gcm))
    }

    fn finalize(self) -> (GHash, aes::Block) {
        let (mut ghash, ct_len) = self.ghash.finish();
        let mut lengths = [0u8; 16];
        // AAD length occupies the first 8 bytes and is always zero here.
        lengths[8..].copy_from_slice(&(ct_len * 8).to_be_bytes());
        ghash.update_padded(&lengths);
        (ghash, self.tag_mask)
    }
}

struct GcmEncryptor(GcmState);

impl StreamEncryptor for GcmEncryptor {
    fn update(&mut self, buf: &mut [u8]) -> Result<()> {
        self.0.apply_keystream(buf)?;
        self.0.ghash.absorb(buf);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        let (ghash, mask) = self.0.finalize();
        let mut tag = ghash.finalize();
        for (t, m) in tag.iter_mut().zip(mask.iter()) {
            *t ^= m;
        }
        tag.to_vec()
    }
}

struct GcmDecryptor(GcmState);

impl StreamDecryptor for GcmDecryptor {
    fn update(&mut self, buf: &mut [u8]) -> Result<()> {
        self.0.ghash.absorb(buf);
        self.0.apply_keystream(buf)
    }

    fn finish(self: Box<Self>, tag: &[u8]) -> Result<()> {
        if tag.len() != TAG_LEN {
            return Err(authentication_failed());
        }
        let (ghash, mask) = self.0.finalize();
        let mut expected = ghash::Block::default();
        for ((e, t), m) in expected.iter_mut().zip(tag).zip(mask.iter()) {
            *e = t ^ m;
        }
        ghash.verify(&expected).map_err(|_| authentication_failed())
    }
}

impl CipherCodec for GcmCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Aes256Gcm
    }

    fn encrypt_stream(&self, key: &[u8; KEY_LEN], nonce: &[u8]) -> Result<Box<dyn StreamEncryptor>> {
        Ok(Box::new(GcmEncryptor(GcmState::new(key, nonce)?)))
    }

    fn decrypt_stream(&self, key: &[u8; KEY_LEN], nonce: &[u8]) -> Result<Box<dyn StreamDecryptor>> {
        Ok(Box::new(GcmDecryptor(GcmState::new(key, nonce)?)))
    }
}

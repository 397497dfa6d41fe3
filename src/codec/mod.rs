//! Cipher codecs
//!
//! One codec per [`Algorithm`]. A codec hands out stream contexts that keep
//! a single keystream (and, for the AEAD formats, a single authenticator)
//! running across every buffer of a file, so the metadata block and the
//! payload are covered by one tag regardless of how the caller chunks I/O.

mod cfb;
mod chacha;
mod gcm;

use ghash::universal_hash::UniversalHash;

use crate::error::{ErrorCategory, ErrorKind, GfglockError, Result};
use crate::format::Algorithm;
use crate::kdf::KEY_LEN;

pub use cfb::CfbCodec;
pub use chacha::ChaChaCodec;
pub use gcm::GcmCodec;

/// Byte layout of a codec's container prefix and suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    pub nonce_len: usize,
    pub tag_len: usize,
    pub header_len: usize,
}

/// Encrypting half of a running cipher context.
pub trait StreamEncryptor {
    /// Encrypt `buf` in place, continuing the keystream.
    fn update(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Close the stream and return the trailing tag (empty for non-AEAD).
    fn finish(self: Box<Self>) -> Vec<u8>;
}

/// Decrypting half of a running cipher context.
pub trait StreamDecryptor {
    /// Decrypt `buf` in place, continuing the keystream.
    fn update(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Close the stream, checking the trailing tag read from the file.
    fn finish(self: Box<Self>, tag: &[u8]) -> Result<()>;
}

pub trait CipherCodec: Sync {
    fn algorithm(&self) -> Algorithm;

    fn header_layout(&self) -> HeaderLayout {
        let algorithm = self.algorithm();
        HeaderLayout {
            nonce_len: algorithm.nonce_len(),
            tag_len: algorithm.tag_len(),
            header_len: algorithm.header_len(),
        }
    }

    fn encrypt_stream(&self, key: &[u8; KEY_LEN], nonce: &[u8]) -> Result<Box<dyn StreamEncryptor>>;

    fn decrypt_stream(&self, key: &[u8; KEY_LEN], nonce: &[u8]) -> Result<Box<dyn StreamDecryptor>>;
}

impl Algorithm {
    pub fn codec(self) -> &'static dyn CipherCodec {
        match self {
            Algorithm::Aes256Gcm => &GcmCodec,
            Algorithm::Aes256Cfb => &CfbCodec,
            Algorithm::ChaCha20Poly1305 => &ChaChaCodec,
        }
    }
}

fn check_nonce(algorithm: Algorithm, nonce: &[u8]) -> Result<()> {
    if nonce.len() != algorithm.nonce_len() {
        return Err(GfglockError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            format!(
                "{} expects a {}-byte nonce, got {}",
                algorithm,
                algorithm.nonce_len(),
                nonce.len()
            ),
        ));
    }
    Ok(())
}

fn keystream_exhausted(algorithm: Algorithm) -> GfglockError {
    GfglockError::with_kind(
        ErrorCategory::User,
        ErrorKind::InvalidArgument,
        format!("input exceeds the maximum message length of {}", algorithm),
    )
}

fn authentication_failed() -> GfglockError {
    GfglockError::with_kind(
        ErrorCategory::User,
        ErrorKind::AuthenticationFailed,
        "authentication failed",
    )
}

/// Feeds arbitrary-length input to a 16-byte-block universal hash,
/// holding back partial blocks until more data arrives.
///
/// Only the final block of the message is zero-padded, which is what both
/// GCM and the ChaCha20-Poly1305 construction expect of the ciphertext.
struct PaddedMac<U: UniversalHash> {
    mac: U,
    pending: [u8; 16],
    pending_len: usize,
    message_len: u64,
}

impl<U: UniversalHash> PaddedMac<U> {
    fn new(mac: U) -> Self {
        Self {
            mac,
            pending: [0u8; 16],
            pending_len: 0,
            message_len: 0,
        }
    }

    fn absorb(&mut self, mut data: &[u8]) {
        self.message_len += data.len() as u64;

        if self.pending_len > 0 {
            let take = (16 - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];
            if self.pending_len < 16 {
                return;
            }
            self.mac.update_padded(&self.pending);
            self.pending_len = 0;
        }

        let full = data.len() - data.len() % 16;
        if full > 0 {
            self.mac.update_padded(&data[..full]);
        }
        let rest = &data[full..];
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }

    /// Pads out the last partial block and returns the hash with the total
    /// number of bytes absorbed.
    fn finish(mut self) -> (U, u64) {
        if self.pending_len > 0 {
            self.mac.update_padded(&self.pending[..self.pending_len]);
        }
        (self.mac, self.message_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        key
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn encrypt_in_pieces(algorithm: Algorithm, plaintext: &[u8], piece: usize) -> Vec<u8> {
        let nonce = vec![9u8; algorithm.nonce_len()];
        let mut enc = algorithm.codec().encrypt_stream(&key(), &nonce).unwrap();
        let mut out = plaintext.to_vec();
        for chunk in out.chunks_mut(piece) {
            enc.update(chunk).unwrap();
        }
        out.extend_from_slice(&enc.finish());
        out
    }

    fn decrypt_in_pieces(algorithm: Algorithm, sealed: &[u8], piece: usize) -> Result<Vec<u8>> {
        let nonce = vec![9u8; algorithm.nonce_len()];
        let mut dec = algorithm.codec().decrypt_stream(&key(), &nonce).unwrap();
        let split = sealed.len() - algorithm.tag_len();
        let mut out = sealed[..split].to_vec();
        for chunk in out.chunks_mut(piece) {
            dec.update(chunk)?;
        }
        dec.finish(&sealed[split..])?;
        Ok(out)
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let plaintext = sample(1000);
        for algorithm in Algorithm::ALL {
            let whole = encrypt_in_pieces(algorithm, &plaintext, plaintext.len());
            for piece in [1, 7, 16, 17, 64, 333] {
                assert_eq!(
                    encrypt_in_pieces(algorithm, &plaintext, piece),
                    whole,
                    "{} with {}-byte pieces",
                    algorithm,
                    piece
                );
            }
            assert_eq!(whole.len(), plaintext.len() + algorithm.tag_len());
        }
    }

    #[test]
    fn test_roundtrip_with_mismatched_pieces() {
        let plaintext = sample(4099);
        for algorithm in Algorithm::ALL {
            let sealed = encrypt_in_pieces(algorithm, &plaintext, 100);
            assert_eq!(decrypt_in_pieces(algorithm, &sealed, 37).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_empty_message() {
        for algorithm in Algorithm::ALL {
            let sealed = encrypt_in_pieces(algorithm, &[], 16);
            assert_eq!(sealed.len(), algorithm.tag_len());
            assert!(decrypt_in_pieces(algorithm, &sealed, 16).unwrap().is_empty());
        }
    }

    #[test]
    fn test_aead_tamper_detected() {
        let plaintext = sample(200);
        for algorithm in [Algorithm::Aes256Gcm, Algorithm::ChaCha20Poly1305] {
            let sealed = encrypt_in_pieces(algorithm, &plaintext, 64);
            for index in [0, 57, 199, 200, 215] {
                let mut tampered = sealed.clone();
                tampered[index] ^= 0x01;
                let err = decrypt_in_pieces(algorithm, &tampered, 64).unwrap_err();
                assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
            }
        }
    }

    #[test]
    fn test_truncated_tag_rejected() {
        let nonce = vec![0u8; 12];
        let dec = GcmCodec.decrypt_stream(&key(), &nonce).unwrap();
        let err = dec.finish(&[0u8; 15]).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_wrong_nonce_length_rejected() {
        assert!(GcmCodec.encrypt_stream(&key(), &[0u8; 16]).is_err());
        assert!(CfbCodec.decrypt_stream(&key(), &[0u8; 12]).is_err());
    }

    #[test]
    fn test_header_layouts() {
        assert_eq!(
            GcmCodec.header_layout(),
            HeaderLayout {
                nonce_len: 12,
                tag_len: 16,
                header_len: 32
            }
        );
        assert_eq!(
            CfbCodec.header_layout(),
            HeaderLayout {
                nonce_len: 16,
                tag_len: 0,
                header_len: 36
            }
        );
        assert_eq!(ChaChaCodec.header_layout().tag_len, 16);
    }

    #[test]
    fn test_gcm_matches_one_shot_aead() {
        use aes_gcm::Aes256Gcm;
        use aes_gcm::aead::generic_array::GenericArray;
        use aes_gcm::aead::{Aead, KeyInit};

        let plaintext = sample(1234);
        let nonce = [9u8; 12];
        let expected = Aes256Gcm::new_from_slice(&key())
            .unwrap()
            .encrypt(GenericArray::from_slice(&nonce), plaintext.as_ref())
            .unwrap();
        assert_eq!(encrypt_in_pieces(Algorithm::Aes256Gcm, &plaintext, 100), expected);
    }

    #[test]
    fn test_chacha_matches_one_shot_aead() {
        use chacha20poly1305::aead::{Aead, KeyInit};
        use chacha20poly1305::{ChaCha20Poly1305, Nonce};

        let plaintext = sample(1234);
        let nonce = [9u8; 12];
        let expected = ChaCha20Poly1305::new_from_slice(&key())
            .unwrap()
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .unwrap();
        assert_eq!(
            encrypt_in_pieces(Algorithm::ChaCha20Poly1305, &plaintext, 100),
            expected
        );
    }
}

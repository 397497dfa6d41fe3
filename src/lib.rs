//! gfglock - Password-based in-place file encryption
//!
//! Files are encrypted with AES-256-GCM, AES-256-CFB or ChaCha20-Poly1305
//! under a key derived per file with PBKDF2-HMAC-SHA256, and converted in
//! place either one at a time ([`file_ops`]) or as a concurrent batch
//! ([`batch`]).

#![forbid(unsafe_code)]

pub mod batch;
pub mod codec;
pub mod config;
pub mod error;
pub mod eta;
pub mod file_ops;
pub mod format;
pub mod kdf;
pub mod passphrase;
pub mod predict;
pub mod progress;

pub use batch::{BatchEngine, BatchEvent, BatchRequest, BatchState, BatchSummary, CancelHandle};
pub use config::{BatchConfig, EtaConfig, Mode};
pub use error::{ErrorCategory, ErrorKind, GfglockError, Result};
pub use file_ops::{FileOutcome, decrypt_file, decrypt_path, encrypt_file, encrypt_path};
pub use format::Algorithm;

//! Container format definitions
//!
//! Every encrypted file is independently self-describing:
//!
//! ```text
//! salt (16) || nonce/IV (12 for AEAD, 16 for CFB) || chunk size (4, big-endian u32)
//!   || Encrypt(filename_utf8 || 0x00 || file bytes)
//!   || tag (16, AEAD only)
//! ```
//!
//! The file extension selects the algorithm on decryption.

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use chrono::Local;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{ErrorCategory, ErrorKind, GfglockError, Result};
use crate::kdf::{SALT_LEN, generate_salt};

/// Length of the big-endian chunk size field
pub const CHUNK_FIELD_LEN: usize = 4;

/// Length of the AEAD authentication tag
pub const TAG_LEN: usize = 16;

/// Nonce length for the AEAD formats
pub const AEAD_NONCE_LEN: usize = 12;

/// IV length for CFB
pub const CFB_IV_LEN: usize = 16;

/// Terminator between the embedded filename and the payload
pub const NAME_TERMINATOR: u8 = 0x00;

/// Files below this size are always processed in one buffer.
pub const SMALL_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Lower bound for the effective chunk size.
pub const IO_BUFFER_SIZE: u64 = 512 * 1024;

/// Upper bound for the effective chunk size.
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// Longest filename accepted from decrypted metadata.
pub const MAX_NAME_LEN: usize = 255;

/// The three supported cipher suites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Algorithm {
    #[default]
    Aes256Gcm,
    Aes256Cfb,
    ChaCha20Poly1305,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [
        Algorithm::Aes256Gcm,
        Algorithm::Aes256Cfb,
        Algorithm::ChaCha20Poly1305,
    ];

    /// Selector string used in settings and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "aes256_gcm",
            Algorithm::Aes256Cfb => "aes256_cfb",
            Algorithm::ChaCha20Poly1305 => "chacha20_poly1305",
        }
    }

    /// File extension, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => ".gfglock",
            Algorithm::Aes256Cfb => ".gfglck",
            Algorithm::ChaCha20Poly1305 => ".gfgcha",
        }
    }

    pub fn nonce_len(self) -> usize {
        match self {
            Algorithm::Aes256Gcm | Algorithm::ChaCha20Poly1305 => AEAD_NONCE_LEN,
            Algorithm::Aes256Cfb => CFB_IV_LEN,
        }
    }

    pub fn tag_len(self) -> usize {
        match self {
            Algorithm::Aes256Gcm | Algorithm::ChaCha20Poly1305 => TAG_LEN,
            Algorithm::Aes256Cfb => 0,
        }
    }

    pub fn is_aead(self) -> bool {
        self.tag_len() > 0
    }

    /// Length of the plaintext header in front of the cipher stream.
    pub fn header_len(self) -> usize {
        SALT_LEN + self.nonce_len() + CHUNK_FIELD_LEN
    }

    /// Bytes a container adds on top of the plaintext and the filename:
    /// header, tag and the name terminator. 49 for the AEAD formats, 37 for CFB.
    pub fn fixed_overhead(self) -> u64 {
        (self.header_len() + self.tag_len() + 1) as u64
    }

    /// Smallest size a valid container of this format can have:
    /// header, tag, and at least one payload byte.
    pub fn min_container_len(self) -> u64 {
        (self.header_len() + self.tag_len() + 1) as u64
    }

    /// Recognise a container by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Algorithm> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        Algorithm::ALL
            .into_iter()
            .find(|alg| name.ends_with(alg.extension()))
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = GfglockError;

    fn from_str(s: &str) -> Result<Self> {
        Algorithm::ALL
            .into_iter()
            .find(|alg| alg.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                GfglockError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::InvalidArgument,
                    format!(
                        "unknown algorithm {:?} (expected aes256_gcm, aes256_cfb or chacha20_poly1305)",
                        s
                    ),
                )
            })
    }
}

/// How the payload is moved between disk and cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// The whole file is read into memory and processed in one call.
    Whole,
    /// The file is streamed in buffers of the given size.
    Chunked(u32),
}

impl ChunkMode {
    /// Mode used when encrypting a plaintext of `file_size` bytes.
    ///
    /// Small files are always processed whole, whatever was requested.
    pub fn for_encryption(requested: Option<u64>, file_size: u64) -> ChunkMode {
        match requested {
            Some(chunk) if chunk > 0 && file_size >= SMALL_FILE_THRESHOLD => {
                ChunkMode::Chunked(effective_chunk_size(chunk))
            }
            _ => ChunkMode::Whole,
        }
    }

    /// Mode recorded in a header's chunk size field, kept exactly as stored.
    pub fn from_field(field: u32) -> ChunkMode {
        match field {
            0 => ChunkMode::Whole,
            n => ChunkMode::Chunked(n),
        }
    }

    pub fn field(self) -> u32 {
        match self {
            ChunkMode::Whole => 0,
            ChunkMode::Chunked(n) => n,
        }
    }
}

fn effective_chunk_size(requested: u64) -> u32 {
    // MAX_CHUNK_SIZE fits in u32, so the conversion cannot fail.
    u32::try_from(requested.clamp(IO_BUFFER_SIZE, MAX_CHUNK_SIZE)).unwrap_or(u32::MAX)
}

/// The plaintext prefix of every container.
///
/// Header fields are written once at encryption time and read back
/// verbatim at decryption time; they are never regenerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub algorithm: Algorithm,
    pub salt: [u8; SALT_LEN],
    pub nonce: Vec<u8>,
    pub chunk_mode: ChunkMode,
}

impl FileHeader {
    /// A header with fresh random salt and nonce.
    pub fn generate(algorithm: Algorithm, chunk_mode: ChunkMode) -> FileHeader {
        let salt = generate_salt();
        let mut nonce = vec![0u8; algorithm.nonce_len()];
        OsRng.fill_bytes(&mut nonce);
        FileHeader {
            algorithm,
            salt,
            nonce,
            chunk_mode,
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.algorithm.header_len()
    }

    pub fn write_to(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        writer.write_all(&self.salt)?;
        writer.write_all(&self.nonce)?;
        writer.write_all(&self.chunk_mode.field().to_be_bytes())
    }

    pub fn read_from(algorithm: Algorithm, reader: &mut dyn Read) -> Result<FileHeader> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = vec![0u8; algorithm.nonce_len()];
        let mut field = [0u8; CHUNK_FIELD_LEN];
        read_fields(reader, &mut [&mut salt[..], &mut nonce[..], &mut field[..]]).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                GfglockError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::TooSmall,
                    "input truncated while reading header",
                    e,
                )
            } else {
                GfglockError::io("failed to read header", e)
            }
        })?;
        Ok(FileHeader {
            algorithm,
            salt,
            nonce,
            chunk_mode: ChunkMode::from_field(u32::from_be_bytes(field)),
        })
    }
}

fn read_fields(reader: &mut dyn Read, fields: &mut [&mut [u8]]) -> std::io::Result<()> {
    for field in fields.iter_mut() {
        reader.read_exact(field)?;
    }
    Ok(())
}

/// Name of the container written for `source_name`.
///
/// With `encrypt_filename` the on-disk name is `{yyyymmddHHMMSS}_{8 hex}{ext}`
/// and the original name survives only inside the encrypted metadata.
pub fn output_name(source_name: &str, algorithm: Algorithm, encrypt_filename: bool) -> String {
    if encrypt_filename {
        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let random = OsRng.next_u32();
        format!("{}_{:08x}{}", stamp, random, algorithm.extension())
    } else {
        format!("{}{}", source_name, algorithm.extension())
    }
}

/// The metadata block: the UTF-8 name followed by the terminator.
pub fn metadata_block(name: &str) -> Vec<u8> {
    let mut block = Vec::with_capacity(name.len() + 1);
    block.extend_from_slice(name.as_bytes());
    block.push(NAME_TERMINATOR);
    block
}

/// Validate a filename recovered from decrypted metadata.
///
/// The name must be usable as a single path component in the container's
/// directory.
pub fn parse_embedded_name(raw: &[u8]) -> Result<String> {
    let name = std::str::from_utf8(raw).map_err(|e| {
        GfglockError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::InvalidMetadata,
            "failed to decode metadata",
            e,
        )
    })?;
    if name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
    {
        return Err(GfglockError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidMetadata,
            "embedded filename is not a valid file name",
        ));
    }
    Ok(name.to_string())
}

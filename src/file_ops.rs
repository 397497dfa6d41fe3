//! File encryption/decryption operations
//!
//! This module converts single files in place: the container (or the
//! recovered plaintext) is written next to the source, and the source is
//! removed only once the new file has been fully written and synced. Any
//! failure removes the partially written destination instead.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::codec::{StreamDecryptor, StreamEncryptor};
use crate::config::DEFAULT_PROGRESS_INTERVAL;
use crate::error::{ErrorCategory, ErrorKind, GfglockError, Result};
use crate::format::{
    Algorithm, ChunkMode, FileHeader, IO_BUFFER_SIZE, MAX_CHUNK_SIZE, MAX_NAME_LEN, NAME_TERMINATOR,
    metadata_block, output_name, parse_embedded_name,
};
use crate::kdf;
use crate::progress::ProgressBatcher;

/// Per-file encryption parameters.
#[derive(Debug, Clone)]
pub struct EncryptOptions {
    pub algorithm: Algorithm,
    /// Requested chunk size in bytes; `None` or `Some(0)` buffers the whole file.
    pub chunk_size: Option<u64>,
    pub encrypt_filename: bool,
    /// Bytes accumulated between two progress callbacks.
    pub progress_interval: u64,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            chunk_size: None,
            encrypt_filename: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Per-file decryption parameters.
#[derive(Debug, Clone)]
pub struct DecryptOptions {
    /// Advisory only. The chunk size stored in the header always wins.
    pub chunk_size_hint: Option<u64>,
    pub progress_interval: u64,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            chunk_size_hint: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Result of a per-file operation that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// The file was converted; `output` is the new file's path.
    Processed { output: PathBuf },
    /// Nothing was done and nothing was touched.
    Skipped { reason: String },
}

/// Encrypt a file in place.
///
/// Writes `{name}{ext}` (or a timestamped random name when
/// `encrypt_filename` is set) next to `path`, then removes `path`.
/// `progress` receives counts of newly processed plaintext bytes.
///
/// A path that already carries a container extension is skipped, not
/// failed.
pub fn encrypt_path(
    path: &Path,
    password: &[u8],
    options: &EncryptOptions,
    progress: Option<&dyn Fn(u64)>,
) -> Result<FileOutcome> {
    let metadata = stat(path)?;
    if let Some(existing) = Algorithm::from_path(path) {
        debug!(path = %path.display(), algorithm = %existing, "skipping already encrypted file");
        return Ok(FileOutcome::Skipped {
            reason: format!("{} is already encrypted", path.display()),
        });
    }
    require_regular_file(path, &metadata)?;
    let name = source_name(path)?;

    let algorithm = options.algorithm;
    let chunk_mode = ChunkMode::for_encryption(options.chunk_size, metadata.len());
    let header = FileHeader::generate(algorithm, chunk_mode);
    let output = path.with_file_name(output_name(name, algorithm, options.encrypt_filename));
    debug!(
        path = %path.display(),
        output = %output.display(),
        %algorithm,
        ?chunk_mode,
        size = metadata.len(),
        "encrypting"
    );

    let key = kdf::derive_key(password, &header.salt);
    let encryptor = algorithm.codec().encrypt_stream(&key, &header.nonce)?;

    let mut input = File::open(path)
        .map_err(|e| GfglockError::io(format!("failed to open {}", path.display()), e))?;
    let mut out = PendingOutput::create(&output)?;
    let mut reporter = ProgressBatcher::new(progress, options.progress_interval);

    header
        .write_to(&mut out)
        .map_err(|e| write_error(&output, e))?;
    write_encrypted(
        encryptor,
        name,
        &mut input,
        chunk_mode,
        &mut out,
        &mut reporter,
    )?;

    out.finish()?;
    drop(input);
    remove_source(path)?;
    let output = out.keep();
    reporter.flush();

    info!(path = %path.display(), output = %output.display(), "encrypted");
    Ok(FileOutcome::Processed { output })
}

fn write_encrypted(
    mut encryptor: Box<dyn StreamEncryptor>,
    name: &str,
    input: &mut File,
    chunk_mode: ChunkMode,
    out: &mut PendingOutput,
    reporter: &mut ProgressBatcher<'_>,
) -> Result<()> {
    let mut meta = metadata_block(name);
    encryptor.update(&mut meta)?;
    out.put(&meta)?;
    reporter.add(meta.len() as u64);

    match chunk_mode {
        ChunkMode::Whole => {
            let mut buf = Vec::new();
            input
                .read_to_end(&mut buf)
                .map_err(|e| GfglockError::io("failed to read input", e))?;
            encryptor.update(&mut buf)?;
            out.put(&buf)?;
            reporter.add(buf.len() as u64);
        }
        ChunkMode::Chunked(chunk) => {
            let mut buf = vec![0u8; chunk as usize];
            loop {
                let n = read_full(input, &mut buf)
                    .map_err(|e| GfglockError::io("failed to read input", e))?;
                if n == 0 {
                    break;
                }
                encryptor.update(&mut buf[..n])?;
                out.put(&buf[..n])?;
                reporter.add(n as u64);
            }
        }
    }

    out.put(&encryptor.finish())
}

/// Decrypt a container in place.
///
/// The algorithm is chosen by the file extension; the salt, nonce and chunk
/// size come from the header. The plaintext is written under the filename
/// stored in the encrypted metadata, next to `path`, and `path` is removed.
/// `progress` receives counts of newly processed ciphertext bytes.
///
/// For the authenticated formats nothing is left on disk unless the tag
/// verifies.
pub fn decrypt_path(
    path: &Path,
    password: &[u8],
    options: &DecryptOptions,
    progress: Option<&dyn Fn(u64)>,
) -> Result<FileOutcome> {
    let metadata = stat(path)?;
    let algorithm = Algorithm::from_path(path).ok_or_else(|| {
        GfglockError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnknownFormat,
            "unknown file format",
        )
    })?;
    require_regular_file(path, &metadata)?;
    if metadata.len() < algorithm.min_container_len() {
        return Err(too_small());
    }

    let mut input = File::open(path)
        .map_err(|e| GfglockError::io(format!("failed to open {}", path.display()), e))?;
    let header = FileHeader::read_from(algorithm, &mut input)?;
    if let Some(hint) = options.chunk_size_hint {
        if ChunkMode::from_field(u32::try_from(hint).unwrap_or(u32::MAX)) != header.chunk_mode {
            debug!(hint, stored = ?header.chunk_mode, "ignoring chunk size hint in favor of header");
        }
    }
    debug!(path = %path.display(), %algorithm, chunk_mode = ?header.chunk_mode, "decrypting");

    let key = kdf::derive_key(password, &header.salt);
    let decryptor = algorithm.codec().decrypt_stream(&key, &header.nonce)?;
    let data_len = metadata.len() - (header.encoded_len() + algorithm.tag_len()) as u64;

    let mut job = DecryptJob {
        source: path,
        algorithm,
        input,
        data_len,
        reporter: ProgressBatcher::new(progress, options.progress_interval),
    };
    let mut out = match header.chunk_mode {
        ChunkMode::Whole => job.whole(decryptor)?,
        ChunkMode::Chunked(chunk) => job.chunked(decryptor, chunk)?,
    };

    out.finish()?;
    drop(job.input);
    remove_source(path)?;
    let output = out.keep();
    job.reporter.flush();

    info!(path = %path.display(), output = %output.display(), "decrypted");
    Ok(FileOutcome::Processed { output })
}

struct DecryptJob<'a> {
    source: &'a Path,
    algorithm: Algorithm,
    input: File,
    data_len: u64,
    reporter: ProgressBatcher<'a>,
}

/// Where decrypted bytes go while the embedded filename is being recovered.
enum Sink {
    Name(Vec<u8>),
    Output(PendingOutput),
    Rejected(GfglockError),
}

impl DecryptJob<'_> {
    fn whole(&mut self, mut decryptor: Box<dyn StreamDecryptor>) -> Result<PendingOutput> {
        let len = usize::try_from(self.data_len).map_err(|_| {
            GfglockError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidArgument,
                "container too large to decrypt in memory",
            )
        })?;
        let mut data = Zeroizing::new(vec![0u8; len]);
        read_exact_or_truncated(&mut self.input, &mut data)?;
        let tag = self.read_tag()?;

        decryptor.update(&mut data)?;
        decryptor.finish(&tag)?;
        self.reporter.add(self.data_len);

        let split = data
            .iter()
            .position(|&b| b == NAME_TERMINATOR)
            .ok_or_else(metadata_not_found)?;
        let name = parse_embedded_name(&data[..split])?;
        let mut out = PendingOutput::create(&self.source.with_file_name(name))?;
        out.put(&data[split + 1..])?;
        Ok(out)
    }

    fn chunked(
        &mut self,
        mut decryptor: Box<dyn StreamDecryptor>,
        chunk: u32,
    ) -> Result<PendingOutput> {
        let buf_len = usize::try_from(chunk_buffer_len(chunk, self.data_len)).map_err(|_| {
            GfglockError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidArgument,
                "chunk size does not fit in memory",
            )
        })?;
        let mut buf = Zeroizing::new(vec![0u8; buf_len]);
        let mut remaining = self.data_len;
        let mut sink = Sink::Name(Vec::new());

        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            read_exact_or_truncated(&mut self.input, &mut buf[..want])?;
            remaining -= want as u64;
            decryptor.update(&mut buf[..want])?;

            let mut payload = &buf[..want];
            if let Sink::Name(pending) = &mut sink {
                match payload.iter().position(|&b| b == NAME_TERMINATOR) {
                    Some(i) => {
                        pending.extend_from_slice(&payload[..i]);
                        payload = &payload[i + 1..];
                        sink = match parse_embedded_name(pending) {
                            Ok(name) => {
                                Sink::Output(PendingOutput::create(&self.source.with_file_name(name))?)
                            }
                            Err(e) => Sink::Rejected(e),
                        };
                    }
                    None => {
                        pending.extend_from_slice(payload);
                        payload = &[];
                        if pending.len() > MAX_NAME_LEN {
                            sink = Sink::Rejected(metadata_not_found());
                        }
                    }
                }
            }

            match &mut sink {
                Sink::Output(out) => out.put(payload)?,
                // Without a tag there is nothing left to check, so fail now.
                Sink::Rejected(_) if !self.algorithm.is_aead() => break,
                _ => {}
            }
            self.reporter.add(want as u64);
        }

        if self.algorithm.is_aead() {
            let tag = self.read_tag()?;
            decryptor.finish(&tag)?;
        }

        match sink {
            Sink::Output(out) => Ok(out),
            Sink::Name(_) => Err(metadata_not_found()),
            Sink::Rejected(e) => Err(e),
        }
    }

    fn read_tag(&mut self) -> Result<Vec<u8>> {
        let mut tag = vec![0u8; self.algorithm.tag_len()];
        read_exact_or_truncated(&mut self.input, &mut tag)?;
        Ok(tag)
    }
}

/// Read buffer for a chunked container. The header field only sets the read
/// granularity; the buffer never exceeds what the container holds.
fn chunk_buffer_len(chunk: u32, data_len: u64) -> u64 {
    u64::from(chunk)
        .clamp(IO_BUFFER_SIZE, MAX_CHUNK_SIZE)
        .min(data_len)
}

/// Encrypt a file, reporting the outcome as `(success, message)`.
///
/// Skips are reported as unsuccessful with an explanatory message, the same
/// way failures are; use [`encrypt_path`] to tell them apart.
pub fn encrypt_file(
    path: &Path,
    password: &[u8],
    encrypt_filename: bool,
    chunk_size: Option<u64>,
    algorithm: Algorithm,
    progress: Option<&dyn Fn(u64)>,
) -> (bool, String) {
    let options = EncryptOptions {
        algorithm,
        chunk_size,
        encrypt_filename,
        ..EncryptOptions::default()
    };
    match encrypt_path(path, password, &options, progress) {
        Ok(FileOutcome::Processed { output }) => (
            true,
            format!("Encrypted: {} -> {}", path.display(), output.display()),
        ),
        Ok(FileOutcome::Skipped { reason }) => (false, reason),
        Err(e) => (false, failure_message("encrypting", path, &e)),
    }
}

/// Decrypt a file, reporting the outcome as `(success, message)`.
pub fn decrypt_file(
    path: &Path,
    password: &[u8],
    chunk_size_hint: Option<u64>,
    progress: Option<&dyn Fn(u64)>,
) -> (bool, String) {
    let options = DecryptOptions {
        chunk_size_hint,
        ..DecryptOptions::default()
    };
    match decrypt_path(path, password, &options, progress) {
        Ok(FileOutcome::Processed { output }) => (
            true,
            format!("Decrypted: {} -> {}", path.display(), output.display()),
        ),
        Ok(FileOutcome::Skipped { reason }) => (false, reason),
        Err(e) => (false, failure_message("decrypting", path, &e)),
    }
}

/// Renders a per-file error the way it appears in the batch message log.
pub fn failure_message(verb: &str, path: &Path, err: &GfglockError) -> String {
    match err.kind {
        Some(ErrorKind::NotFound) => format!("Critical error: {} not found", path.display()),
        Some(ErrorKind::TooSmall) => {
            format!("Critical error: {} is too small or corrupted", path.display())
        }
        _ => format!(
            "Critical error while {} {}: {}",
            verb,
            path.display(),
            err.chain_message()
        ),
    }
}

/// A destination file that is removed again unless [`PendingOutput::keep`]
/// is called.
struct PendingOutput {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    kept: bool,
}

impl PendingOutput {
    /// Create `path`, failing if anything already exists there.
    ///
    /// The file is created with mode 0o600 (read/write for owner only) on Unix systems.
    fn create(path: &Path) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                GfglockError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::OutputExists,
                    format!("{} already exists", path.display()),
                    e,
                )
            } else {
                GfglockError::io(format!("failed to create {}", path.display()), e)
            }
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            kept: false,
        })
    }

    fn put(&mut self, data: &[u8]) -> Result<()> {
        self.write_all(data).map_err(|e| write_error(&self.path, e))
    }

    /// Flush and fsync, so that the source may be removed afterwards.
    fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| write_error(&self.path, e))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| GfglockError::io(format!("failed to sync {}", self.path.display()), e))?;
        }
        Ok(())
    }

    fn keep(mut self) -> PathBuf {
        self.kept = true;
        std::mem::take(&mut self.path)
    }
}

impl Write for PendingOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(io::Error::other("output already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for PendingOutput {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        // Close before removing.
        self.writer.take();
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove partial output");
        } else {
            debug!(path = %self.path.display(), "removed partial output");
        }
    }
}

fn stat(path: &Path) -> Result<fs::Metadata> {
    fs::metadata(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            GfglockError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::NotFound,
                format!("{} not found", path.display()),
                e,
            )
        } else {
            GfglockError::io(format!("failed to stat {}", path.display()), e)
        }
    })
}

fn require_regular_file(path: &Path, metadata: &fs::Metadata) -> Result<()> {
    if metadata.is_file() {
        return Ok(());
    }
    Err(GfglockError::with_kind(
        ErrorCategory::User,
        ErrorKind::InvalidArgument,
        format!("{} is not a regular file", path.display()),
    ))
}

fn source_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            GfglockError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidArgument,
                format!("{} does not have a UTF-8 file name", path.display()),
            )
        })
}

fn remove_source(path: &Path) -> Result<()> {
    fs::remove_file(path)
        .map_err(|e| GfglockError::io(format!("failed to remove {}", path.display()), e))
}

fn write_error(path: &Path, err: io::Error) -> GfglockError {
    GfglockError::io(format!("failed to write {}", path.display()), err)
}

fn too_small() -> GfglockError {
    GfglockError::with_kind(
        ErrorCategory::User,
        ErrorKind::TooSmall,
        "file is too small or corrupted",
    )
}

fn metadata_not_found() -> GfglockError {
    GfglockError::with_kind(
        ErrorCategory::User,
        ErrorKind::MetadataNotFound,
        "metadata not found",
    )
}

/// Fill `buf` as far as the reader allows; returns the number of bytes read,
/// which is short only at end of input.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_exact_or_truncated(reader: &mut dyn Read, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            too_small()
        } else {
            GfglockError::io("failed to read input", e)
        }
    })
}

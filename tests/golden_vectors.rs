//! Golden test vector validation
//!
//! The containers in testdata/golden-vectors.json were produced by an
//! independent AES-GCM, AES-CFB and ChaCha20-Poly1305 implementation, so
//! these tests pin the on-disk format as well as the ciphers.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use gfglock::file_ops::{DecryptOptions, decrypt_path};
use gfglock::format::{ChunkMode, FileHeader, metadata_block};
use gfglock::kdf::{SALT_LEN, derive_key};
use gfglock::{Algorithm, FileOutcome};

#[derive(Debug, Deserialize)]
struct GoldenVector {
    algorithm: String,
    password: String,
    salt: String,
    nonce: String,
    chunk_size: u32,
    name: String,
    plaintext: String,
    container_name: String,
    container: String,
    comment: String,
}

#[derive(Debug, Deserialize)]
struct KdfVector {
    password: String,
    salt: String,
    key: String,
    comment: String,
}

fn load_golden_vectors() -> Vec<GoldenVector> {
    let json_data = include_str!("../testdata/golden-vectors.json");
    serde_json::from_str(json_data).expect("failed to parse golden vectors")
}

fn load_kdf_vectors() -> Vec<KdfVector> {
    let json_data = include_str!("../testdata/kdf-vectors.json");
    serde_json::from_str(json_data).expect("failed to parse kdf vectors")
}

fn salt_from_hex(s: &str) -> [u8; SALT_LEN] {
    hex::decode(s)
        .expect("failed to decode salt")
        .try_into()
        .expect("salt must be 16 bytes")
}

/// Re-create a container from the vector's fixed salt and nonce.
fn encrypt_deterministic(vector: &GoldenVector) -> Vec<u8> {
    let algorithm: Algorithm = vector.algorithm.parse().unwrap();
    let password = hex::decode(&vector.password).unwrap();
    let header = FileHeader {
        algorithm,
        salt: salt_from_hex(&vector.salt),
        nonce: hex::decode(&vector.nonce).unwrap(),
        chunk_mode: ChunkMode::from_field(vector.chunk_size),
    };
    let key = derive_key(&password, &header.salt);

    let mut out = Vec::new();
    header.write_to(&mut out).unwrap();
    let mut encryptor = algorithm
        .codec()
        .encrypt_stream(&key, &header.nonce)
        .unwrap();
    let mut body = metadata_block(&vector.name);
    body.extend_from_slice(&hex::decode(&vector.plaintext).unwrap());
    encryptor.update(&mut body).unwrap();
    out.extend_from_slice(&body);
    out.extend_from_slice(&encryptor.finish());
    out
}

fn decrypt_from_disk(vector: &GoldenVector, dir: &Path) -> Result<Vec<u8>, String> {
    let container = dir.join(&vector.container_name);
    fs::write(&container, hex::decode(&vector.container).unwrap()).unwrap();
    let password = hex::decode(&vector.password).unwrap();

    match decrypt_path(&container, &password, &DecryptOptions::default(), None) {
        Ok(FileOutcome::Processed { output }) => {
            if output != dir.join(&vector.name) {
                return Err(format!("restored to {}", output.display()));
            }
            if container.exists() {
                return Err("container was not removed".to_string());
            }
            Ok(fs::read(output).unwrap())
        }
        Ok(FileOutcome::Skipped { reason }) => Err(format!("skipped: {}", reason)),
        Err(e) => Err(e.chain_message()),
    }
}

#[test]
fn test_golden_vectors() {
    let vectors = load_golden_vectors();
    println!("Testing {} golden vectors", vectors.len());

    let mut passed = 0;
    let mut failed = 0;

    for (i, vector) in vectors.iter().enumerate() {
        let expected_container = hex::decode(&vector.container).unwrap();
        let encrypted = encrypt_deterministic(vector);
        if encrypted != expected_container {
            eprintln!("Vector {}: FAILED - container mismatch", i);
            eprintln!("  Comment: {}", vector.comment);
            eprintln!("  Expected: {}", vector.container);
            eprintln!("  Actual:   {}", hex::encode(&encrypted));
            failed += 1;
            continue;
        }

        let temp_dir = TempDir::new().unwrap();
        let decrypted = match decrypt_from_disk(vector, temp_dir.path()) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("Vector {}: FAILED to decrypt - {}", i, e);
                eprintln!("  Comment: {}", vector.comment);
                failed += 1;
                continue;
            }
        };

        if decrypted != hex::decode(&vector.plaintext).unwrap() {
            eprintln!("Vector {}: FAILED - plaintext mismatch", i);
            eprintln!("  Comment: {}", vector.comment);
            failed += 1;
            continue;
        }

        passed += 1;
    }

    println!(
        "Results: {} passed, {} failed out of {} total",
        passed,
        failed,
        passed + failed
    );
    assert_eq!(failed, 0, "Some golden vectors failed validation");
    assert!(passed > 0, "No golden vectors were tested");
}

#[test]
fn test_golden_vectors_cover_every_algorithm() {
    let vectors = load_golden_vectors();
    for algorithm in Algorithm::ALL {
        assert!(
            vectors.iter().any(|v| v.algorithm == algorithm.as_str()),
            "no vector for {}",
            algorithm
        );
    }
}

#[test]
fn test_kdf_vectors() {
    for vector in load_kdf_vectors() {
        let password = hex::decode(&vector.password).unwrap();
        let key = derive_key(&password, &salt_from_hex(&vector.salt));
        assert_eq!(hex::encode(*key), vector.key, "{}", vector.comment);
    }
}

#[test]
fn test_corrupted_golden_container_is_rejected() {
    for vector in load_golden_vectors() {
        let algorithm: Algorithm = vector.algorithm.parse().unwrap();
        if !algorithm.is_aead() {
            continue;
        }
        let temp_dir = TempDir::new().unwrap();
        let container = temp_dir.path().join(&vector.container_name);
        let mut data = hex::decode(&vector.container).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0x01;
        fs::write(&container, &data).unwrap();

        let password = hex::decode(&vector.password).unwrap();
        let err = decrypt_path(&container, &password, &DecryptOptions::default(), None)
            .unwrap_err();
        assert!(
            err.is(gfglock::ErrorKind::AuthenticationFailed),
            "{}: {}",
            vector.comment,
            err
        );
        assert!(container.exists());
        assert!(!temp_dir.path().join(&vector.name).exists());
    }
}

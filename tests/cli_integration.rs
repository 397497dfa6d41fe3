//! CLI integration tests
//!
//! Tests the command-line interface end-to-end.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Get path to the gfglock binary
fn gfglock_bin() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // Remove test binary name
    path.pop(); // Remove deps/
    path.push("gfglock");
    path
}

/// Run gfglock with password from stdin
fn run_gfglock_with_password(
    args: &[&str],
    password: &str,
) -> Result<std::process::Output, std::io::Error> {
    let mut child = Command::new(gfglock_bin())
        .arg("--password-stdin")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    {
        let stdin = child.stdin.as_mut().expect("failed to open stdin");
        // Ignore BrokenPipe errors - the command may exit before reading stdin
        // if it rejects its arguments
        let _ = stdin.write_all(password.as_bytes());
    }

    child.wait_with_output()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

/// Names of the entries in `dir`, sorted.
fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

#[test]
fn test_encrypt_decrypt_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("hello.txt");
    fs::write(&plaintext, "Hello, world!\n").unwrap();

    let result = run_gfglock_with_password(&["encrypt", path_str(&plaintext)], "test").unwrap();
    assert!(
        result.status.success(),
        "encrypt failed: {}",
        String::from_utf8_lossy(&result.stderr)
    );
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("Encrypted: "), "stdout: {}", stdout);
    assert!(stdout.contains("1 succeeded, 0 failed, 0 skipped"), "stdout: {}", stdout);

    let encrypted = temp_dir.path().join("hello.txt.gfglock");
    assert!(!plaintext.exists());
    assert!(encrypted.exists());

    let result = run_gfglock_with_password(&["decrypt", path_str(&encrypted)], "test").unwrap();
    assert!(
        result.status.success(),
        "decrypt failed: {}",
        String::from_utf8_lossy(&result.stderr)
    );
    assert!(!encrypted.exists());
    assert_eq!(fs::read_to_string(&plaintext).unwrap(), "Hello, world!\n");
}

#[test]
fn test_algorithm_selects_extension() {
    for (algorithm, extension) in [
        ("aes256_gcm", "gfglock"),
        ("aes256_cfb", "gfglck"),
        ("chacha20_poly1305", "gfgcha"),
    ] {
        let temp_dir = TempDir::new().unwrap();
        let plaintext = temp_dir.path().join("data.bin");
        fs::write(&plaintext, [7u8; 1000]).unwrap();

        let result = run_gfglock_with_password(
            &["encrypt", "--algorithm", algorithm, path_str(&plaintext)],
            "test",
        )
        .unwrap();
        assert!(
            result.status.success(),
            "encrypt with {} failed: {}",
            algorithm,
            String::from_utf8_lossy(&result.stderr)
        );
        assert_eq!(list_dir(temp_dir.path()), vec![format!("data.bin.{}", extension)]);

        let result = run_gfglock_with_password(&["d", path_str(temp_dir.path())], "test").unwrap();
        assert!(result.status.success());
        assert_eq!(fs::read(&plaintext).unwrap(), vec![7u8; 1000]);
    }
}

#[test]
fn test_directory_with_encrypted_names() {
    let temp_dir = TempDir::new().unwrap();
    let nested = temp_dir.path().join("nested");
    fs::create_dir(&nested).unwrap();
    fs::write(temp_dir.path().join("a.txt"), "alpha").unwrap();
    fs::write(nested.join("b.txt"), "beta").unwrap();

    let result = run_gfglock_with_password(
        &["encrypt", "--encrypt-names", path_str(temp_dir.path())],
        "test",
    )
    .unwrap();
    assert!(
        result.status.success(),
        "encrypt failed: {}",
        String::from_utf8_lossy(&result.stderr)
    );
    let top = list_dir(temp_dir.path());
    assert_eq!(top.len(), 2);
    assert!(top.contains(&"nested".to_string()));
    assert!(top.iter().all(|n| n == "nested" || n.ends_with(".gfglock")));
    assert!(!top.contains(&"a.txt.gfglock".to_string()));

    let result = run_gfglock_with_password(&["decrypt", path_str(temp_dir.path())], "test").unwrap();
    assert!(
        result.status.success(),
        "decrypt failed: {}",
        String::from_utf8_lossy(&result.stderr)
    );
    assert_eq!(list_dir(temp_dir.path()), vec!["a.txt", "nested"]);
    assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt")).unwrap(), "alpha");
    assert_eq!(fs::read_to_string(nested.join("b.txt")).unwrap(), "beta");
}

#[test]
fn test_decrypt_with_wrong_password_fails() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("secret.txt");
    fs::write(&plaintext, "Original").unwrap();

    let result =
        run_gfglock_with_password(&["encrypt", path_str(&plaintext)], "correct_password").unwrap();
    assert!(result.status.success());

    let encrypted = temp_dir.path().join("secret.txt.gfglock");
    let result =
        run_gfglock_with_password(&["decrypt", path_str(&encrypted)], "wrong_password").unwrap();

    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(
        stderr.contains("authentication failed"),
        "Expected error message about authentication, got: {}",
        stderr
    );
    assert!(encrypted.exists());
    assert!(!plaintext.exists());
}

#[test]
fn test_decrypt_skips_plain_files() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("notes.txt");
    fs::write(&plaintext, "not encrypted").unwrap();

    let result = run_gfglock_with_password(&["decrypt", path_str(&plaintext)], "test").unwrap();

    assert!(result.status.success());
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("is not an encrypted file"), "stdout: {}", stdout);
    assert!(stdout.contains("0 succeeded, 0 failed, 1 skipped"), "stdout: {}", stdout);
    assert_eq!(fs::read_to_string(&plaintext).unwrap(), "not encrypted");
}

#[test]
fn test_encrypt_nonexistent_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let nonexistent = temp_dir.path().join("nonexistent.txt");

    let result = run_gfglock_with_password(&["encrypt", path_str(&nonexistent)], "test").unwrap();

    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
    assert!(list_dir(temp_dir.path()).is_empty());
}

#[test]
fn test_empty_password_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("hello.txt");
    fs::write(&plaintext, "Hello").unwrap();

    let result = run_gfglock_with_password(&["encrypt", path_str(&plaintext)], "\n").unwrap();

    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("Error: password must not be empty"), "stderr: {}", stderr);
    assert!(plaintext.exists());
}

#[test]
fn test_unknown_algorithm_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("hello.txt");
    fs::write(&plaintext, "Hello").unwrap();

    let result = run_gfglock_with_password(
        &["encrypt", "--algorithm", "rot13", path_str(&plaintext)],
        "test",
    )
    .unwrap();

    assert!(!result.status.success());
    assert!(plaintext.exists());
}

#[test]
fn test_empty_file_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("empty.txt");
    fs::write(&plaintext, b"").unwrap();

    let result = run_gfglock_with_password(&["encrypt", path_str(&plaintext)], "test").unwrap();
    assert!(result.status.success());

    let encrypted = temp_dir.path().join("empty.txt.gfglock");
    let result = run_gfglock_with_password(&["decrypt", path_str(&encrypted)], "test").unwrap();
    assert!(result.status.success());
    assert_eq!(fs::read(&plaintext).unwrap(), b"");
}

#[test]
fn test_large_file_chunked_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("large.bin");
    let large_content: Vec<u8> = (0..11 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    fs::write(&plaintext, &large_content).unwrap();

    let result = run_gfglock_with_password(
        &[
            "encrypt",
            "--chunk-size",
            "1",
            "--threads",
            "1",
            path_str(&plaintext),
        ],
        "test",
    )
    .unwrap();
    assert!(
        result.status.success(),
        "encrypt failed: {}",
        String::from_utf8_lossy(&result.stderr)
    );

    let encrypted = temp_dir.path().join("large.bin.gfglock");
    let header = fs::read(&encrypted).unwrap();
    assert_eq!(&header[28..32], &(1024u32 * 1024).to_be_bytes());

    let result = run_gfglock_with_password(&["decrypt", path_str(&encrypted)], "test").unwrap();
    assert!(result.status.success());
    assert_eq!(fs::read(&plaintext).unwrap(), large_content);
}

#[test]
fn test_chunk_size_conflicts_with_whole_file() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext = temp_dir.path().join("hello.txt");
    fs::write(&plaintext, "Hello").unwrap();

    let result = run_gfglock_with_password(
        &[
            "encrypt",
            "--chunk-size",
            "8",
            "--whole-file",
            path_str(&plaintext),
        ],
        "test",
    )
    .unwrap();

    assert!(!result.status.success());
    assert!(plaintext.exists());
}

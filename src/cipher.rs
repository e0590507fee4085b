//! In-place file encryption with ChaCha20-Poly1305.
//!
//! An encrypted file holds [`MAGIC`], a random 12-byte nonce and the sealed
//! contents. The key lives in its own file as base64 text and is generated
//! the first time something is encrypted.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Leading bytes of every file this module has encrypted.
pub const MAGIC: &[u8; 8] = b"TIDYENC1";

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Bytes in front of the sealed contents.
pub const HEADER_LEN: usize = MAGIC.len() + NONCE_LEN;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("key file {} does not exist", .0.display())]
    MissingKey(PathBuf),

    #[error("key file {} is invalid: {reason}", path.display())]
    InvalidKey { path: PathBuf, reason: String },

    #[error("{} is already encrypted", .0.display())]
    AlreadyEncrypted(PathBuf),

    #[error("{} is not an encrypted file", .0.display())]
    NotEncrypted(PathBuf),

    #[error("{} could not be decrypted: wrong key or corrupted contents", .0.display())]
    Authentication(PathBuf),

    #[error("failed to encrypt {}", .0.display())]
    Seal(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type CipherResult<T> = Result<T, CipherError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CipherError + '_ {
    move |source| CipherError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A 256-bit key read from (or written to) a key file.
pub struct FileKey {
    bytes: [u8; KEY_LEN],
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FileKey(..)")
    }
}

impl FileKey {
    pub fn generate() -> Self {
        Self {
            bytes: rand::random(),
        }
    }

    pub fn load(path: &Path) -> CipherResult<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CipherError::MissingKey(path.to_path_buf()));
            }
            Err(e) => return Err(io_err(path)(e)),
        };
        let invalid = |reason: String| CipherError::InvalidKey {
            path: path.to_path_buf(),
            reason,
        };
        let decoded = STANDARD
            .decode(text.trim())
            .map_err(|e| invalid(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| invalid(format!("expected {KEY_LEN} bytes, found {}", v.len())))?;
        Ok(Self { bytes })
    }

    /// Loads the key at `path`, generating and saving a new one when the
    /// file does not exist yet.
    pub fn load_or_create(path: &Path) -> CipherResult<Self> {
        match Self::load(path) {
            Err(CipherError::MissingKey(_)) => {}
            other => return other,
        }

        let key = Self::generate();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        match options.open(path) {
            Ok(mut file) => {
                writeln!(file, "{}", STANDARD.encode(key.bytes)).map_err(io_err(path))?;
                tracing::info!(path = %path.display(), "generated encryption key");
                Ok(key)
            }
            // Another process created it first.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Self::load(path),
            Err(e) => Err(io_err(path)(e)),
        }
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.bytes))
    }
}

pub fn is_encrypted(contents: &[u8]) -> bool {
    contents.len() >= HEADER_LEN && contents.starts_with(MAGIC)
}

/// Encrypts the file at `path` in place.
pub fn encrypt_file(key: &FileKey, path: &Path) -> CipherResult<()> {
    let plain = fs::read(path).map_err(io_err(path))?;
    if is_encrypted(&plain) {
        return Err(CipherError::AlreadyEncrypted(path.to_path_buf()));
    }

    let nonce: [u8; NONCE_LEN] = rand::random();
    let sealed = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plain.as_slice())
        .map_err(|_| CipherError::Seal(path.to_path_buf()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    replace_contents(path, &out)
}

/// Decrypts a file produced by [`encrypt_file`] in place. The file is left
/// untouched when the key does not match.
pub fn decrypt_file(key: &FileKey, path: &Path) -> CipherResult<()> {
    let contents = fs::read(path).map_err(io_err(path))?;
    if !is_encrypted(&contents) {
        return Err(CipherError::NotEncrypted(path.to_path_buf()));
    }

    let (nonce, sealed) = contents[MAGIC.len()..].split_at(NONCE_LEN);
    let plain = key
        .cipher()
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CipherError::Authentication(path.to_path_buf()))?;
    replace_contents(path, &plain)
}

/// Writes `contents` to a sibling file and renames it over `path`, so a
/// crash never leaves a half-written file behind.
fn replace_contents(path: &Path, contents: &[u8]) -> CipherResult<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = path.with_file_name(format!(".{name}.tidyfold-tmp"));
    let permissions = fs::metadata(path).map_err(io_err(path))?.permissions();

    let written = fs::write(&staging, contents)
        .and_then(|()| fs::set_permissions(&staging, permissions))
        .and_then(|()| fs::rename(&staging, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&staging);
        return Err(io_err(path)(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encrypt_then_decrypt_restores_contents() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let file = temp_dir.path().join("notes.txt");
        fs::write(&file, "meeting at noon").unwrap();
        let key = FileKey::generate();

        encrypt_file(&key, &file).unwrap();
        let sealed = fs::read(&file).unwrap();
        assert!(sealed.starts_with(MAGIC));
        assert!(!String::from_utf8_lossy(&sealed).contains("meeting"));

        decrypt_file(&key, &file).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "meeting at noon");
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_wrong_key_leaves_file_untouched() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let file = temp_dir.path().join("notes.txt");
        fs::write(&file, "secret").unwrap();
        encrypt_file(&FileKey::generate(), &file).unwrap();
        let sealed = fs::read(&file).unwrap();

        let result = decrypt_file(&FileKey::generate(), &file);

        assert!(matches!(result, Err(CipherError::Authentication(_))));
        assert_eq!(fs::read(&file).unwrap(), sealed);
    }

    #[test]
    fn test_double_encrypt_and_plain_decrypt_are_refused() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let file = temp_dir.path().join("notes.txt");
        fs::write(&file, "plain").unwrap();
        let key = FileKey::generate();

        assert!(matches!(
            decrypt_file(&key, &file),
            Err(CipherError::NotEncrypted(_))
        ));
        encrypt_file(&key, &file).unwrap();
        assert!(matches!(
            encrypt_file(&key, &file),
            Err(CipherError::AlreadyEncrypted(_))
        ));
    }

    #[test]
    fn test_key_file_is_created_once_and_reused() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let key_path = temp_dir.path().join("keys/encryption.key");
        let file = temp_dir.path().join("a.bin");
        fs::write(&file, [0u8, 1, 2, 3]).unwrap();

        assert!(matches!(
            FileKey::load(&key_path),
            Err(CipherError::MissingKey(_))
        ));
        let created = FileKey::load_or_create(&key_path).unwrap();
        encrypt_file(&created, &file).unwrap();

        let reloaded = FileKey::load_or_create(&key_path).unwrap();
        decrypt_file(&reloaded, &file).unwrap();
        assert_eq!(fs::read(&file).unwrap(), vec![0u8, 1, 2, 3]);
    }

    #[test]
    fn test_malformed_key_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let key_path = temp_dir.path().join("encryption.key");

        fs::write(&key_path, "not base64 at all!").unwrap();
        assert!(matches!(
            FileKey::load(&key_path),
            Err(CipherError::InvalidKey { .. })
        ));

        fs::write(&key_path, STANDARD.encode([7u8; 16])).unwrap();
        assert!(matches!(
            FileKey::load_or_create(&key_path),
            Err(CipherError::InvalidKey { .. })
        ));
    }
}

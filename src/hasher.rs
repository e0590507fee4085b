//! Streaming content digests.
//!
//! Files are read in fixed-size chunks so large files never need to be
//! buffered in memory. Both the duplicate finder and the directory diff
//! compare files through [`hash_file`].
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Size of each read when hashing a file.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// A fixed-size content digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(blake3::Hash);

impl Digest {
    /// Returns the lowercase hex form of this digest.
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    /// Parses a digest previously produced by [`Digest::to_hex`].
    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex).ok().map(Digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

/// Hashes everything readable from `reader`, one chunk at a time.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<Digest> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(Digest(hasher.finalize()))
}

/// Computes the content digest of the file at `path`.
///
/// # Examples
///
/// ```no_run
/// use tidyfold::hasher::hash_file;
/// use std::path::Path;
///
/// let digest = hash_file(Path::new("/tmp/report.pdf")).unwrap();
/// println!("{}", digest);
/// ```
pub fn hash_file(path: &Path) -> io::Result<Digest> {
    let file = File::open(path)?;
    hash_reader(file)
}

//! Duplicate-source detection
//!
//! A source fingerprint is SHA-256 over the first 1 MiB of the file plus its
//! total size. Reading only the head keeps ingest fast on large WAVs while
//! the size term separates files that share a header.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use super::ImportError;

const HASH_HEAD_BYTES: usize = 1024 * 1024;

/// Fingerprint a source file for duplicate detection
pub fn source_hash(file_path: &Path) -> Result<String, ImportError> {
    if !file_path.exists() {
        return Err(ImportError::FileNotFound(file_path.display().to_string()));
    }

    let file_size = std::fs::metadata(file_path)
        .map_err(|e| ImportError::MetadataExtraction(format!("failed to stat file: {}", e)))?
        .len();

    let file = File::open(file_path)
        .map_err(|e| ImportError::MetadataExtraction(format!("failed to open file: {}", e)))?;
    let mut reader = BufReader::new(file).take(HASH_HEAD_BYTES as u64);

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| ImportError::MetadataExtraction(format!("failed to read file: {}", e)))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    hasher.update(file_size.to_le_bytes());

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_identical_content_hashes_equal() {
        let dir = tempfile::tempdir().unwrap();
        let a = temp_file(dir.path(), "a.wav", b"identical bytes");
        let b = temp_file(dir.path(), "b.wav", b"identical bytes");

        assert_eq!(source_hash(&a).unwrap(), source_hash(&b).unwrap());
    }

    #[test]
    fn test_different_content_hashes_differ() {
        let dir = tempfile::tempdir().unwrap();
        let a = temp_file(dir.path(), "a.wav", b"content one");
        let b = temp_file(dir.path(), "b.wav", b"content two");

        assert_ne!(source_hash(&a).unwrap(), source_hash(&b).unwrap());
    }

    #[test]
    fn test_same_head_different_size_differs() {
        let dir = tempfile::tempdir().unwrap();
        let mut long = vec![7u8; HASH_HEAD_BYTES];
        let a = temp_file(dir.path(), "a.wav", &long);
        long.extend_from_slice(&[7u8; 512]);
        let b = temp_file(dir.path(), "b.wav", &long);

        assert_ne!(source_hash(&a).unwrap(), source_hash(&b).unwrap());
    }

    #[test]
    fn test_missing_file() {
        let result = source_hash(Path::new("/nonexistent/file.wav"));
        assert!(matches!(result, Err(ImportError::FileNotFound(_))));
    }
}

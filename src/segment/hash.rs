//! Content hashing for segment files.
//!
//! Hashes the file size plus the first and last MiB, which is enough to tell
//! segment files apart without reading whole recordings.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const CHUNK_SIZE: u64 = 1024 * 1024;

/// SHA-256 over size, first MiB and last MiB, as lowercase hex.
pub fn compute_file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();

    let mut hasher = Sha256::new();
    hasher.update(file_size.to_le_bytes());

    if file_size <= CHUNK_SIZE * 2 {
        let mut buffer = Vec::with_capacity(file_size as usize);
        file.read_to_end(&mut buffer)?;
        hasher.update(&buffer);
    } else {
        let mut buffer = vec![0u8; CHUNK_SIZE as usize];
        file.read_exact(&mut buffer)?;
        hasher.update(&buffer);

        file.seek(SeekFrom::End(-(CHUNK_SIZE as i64)))?;
        file.read_exact(&mut buffer)?;
        hasher.update(&buffer);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_hash_is_stable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("segment.mp3");
        std::fs::write(&path, b"ID3 fake audio").unwrap();

        let hash = compute_file_hash(&path).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_file_hash(&path).unwrap());
    }

    #[test]
    fn test_hash_differs_by_content() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        std::fs::write(&a, b"Content A").unwrap();
        std::fs::write(&b, b"Content B").unwrap();

        assert_ne!(compute_file_hash(&a).unwrap(), compute_file_hash(&b).unwrap());
    }

    #[test]
    fn test_large_file_ignores_middle() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let mut data = vec![7u8; (CHUNK_SIZE * 3) as usize];
        std::fs::write(&a, &data).unwrap();
        data[(CHUNK_SIZE + 10) as usize] = 0;
        std::fs::write(&b, &data).unwrap();

        // Only the sampled head and tail count
        assert_eq!(compute_file_hash(&a).unwrap(), compute_file_hash(&b).unwrap());
    }

    #[test]
    fn test_missing_file_errors() {
        assert!(compute_file_hash(Path::new("/nonexistent/segment.mp3")).is_err());
    }
}

//! Checksum helpers used by submission, triage, and the file watcher.

use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

const BLOCK_SIZE: usize = 0x1000;

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Chunked SHA-256 of a file on disk, so large samples and dropped files
/// never get pulled into memory whole.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; BLOCK_SIZE];
    loop {
        let read = file.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_md5_known_value() {
        // `echo -n hello | md5`
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn test_sha256_file_matches_in_memory() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data = vec![0xabu8; BLOCK_SIZE * 3 + 17];
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let from_file = sha256_file(tmp.path()).await.unwrap();
        assert_eq!(from_file, sha256_hex(&data));
    }
}

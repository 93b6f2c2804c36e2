use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Asynchronously computes the SHA-256 digest of a file by streaming it
/// through the hasher in chunks. The hex string is the archive fingerprint
/// used as the cache's primary key.
pub async fn fingerprint_file<P: AsRef<Path>>(path: P) -> Result<String, io::Error> {
    let mut file = File::open(path.as_ref()).await?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Computes the SHA-256 digest of a byte slice.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_for_equal_bytes() {
        let a = fingerprint_bytes(b"the same archive bytes");
        let b = fingerprint_bytes(b"the same archive bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn file_digest_matches_byte_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        tokio::fs::write(&path, b"fingerprint me").await.unwrap();
        assert_eq!(
            fingerprint_file(&path).await.unwrap(),
            fingerprint_bytes(b"fingerprint me")
        );
    }
}

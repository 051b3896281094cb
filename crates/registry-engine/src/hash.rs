#![deny(unsafe_code)]

use std::path::Path;

use sha2::Digest;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = sha2::Sha256::digest(bytes);
    hex::encode(digest)
}

/// Hash a file's full contents. Used to pin raw extracts in the store
/// manifest and to decide whether a pipeline stage may be skipped.
pub fn sha256_hex_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::sha256_hex;

    #[test]
    fn empty_input_matches_known_digest() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_is_stable_for_same_bytes() {
        assert_eq!(sha256_hex(b"registry"), sha256_hex(b"registry"));
        assert_ne!(sha256_hex(b"registry"), sha256_hex(b"Registry"));
    }
}

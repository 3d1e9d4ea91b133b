//! Git blob hashing.
//!
//! GitHub reports a file's blob SHA in its contents API. Hashing a local file
//! the same way (`sha1("blob <len>\0" + content)`) tells whether a download
//! can be skipped, which is the basis for an incremental archive mode.

use sha1::{Digest, Sha1};
use std::io;
use std::path::Path;

/// Hex-encoded git blob id of `content`
pub fn git_blob_sha1(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Whether the file at `path` already has the blob id `remote_sha`.
///
/// A missing file is simply out of date.
pub fn is_unchanged(path: &Path, remote_sha: &str) -> io::Result<bool> {
    match std::fs::read(path) {
        Ok(content) => Ok(git_blob_sha1(&content).eq_ignore_ascii_case(remote_sha)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_matches_git_hash_object() {
        // `git hash-object` of an empty file
        assert_eq!(git_blob_sha1(b""), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
        // `echo "hello world" | git hash-object --stdin`
        assert_eq!(
            git_blob_sha1(b"hello world\n"),
            "3b18e512dba79e4c8300dd08aeb37f8e728b8dad"
        );
    }

    #[test]
    fn test_is_unchanged() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("greeting.txt");

        assert!(!is_unchanged(&path, "3b18e512dba79e4c8300dd08aeb37f8e728b8dad").unwrap());

        std::fs::write(&path, "hello world\n").unwrap();
        assert!(is_unchanged(&path, "3B18E512DBA79E4C8300DD08AEB37F8E728B8DAD").unwrap());
        assert!(!is_unchanged(&path, "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391").unwrap());
    }
}

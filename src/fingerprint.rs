//! Workspace fingerprint: scopes persisted task data to a specific set of
//! configured workspaces so different combinations never share history.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Compute the 16-hex-character fingerprint of a sorted set of absolute
/// workspace paths.
pub fn fingerprint(workspace_paths: &[impl AsRef<Path>]) -> String {
    let mut paths: Vec<String> = workspace_paths
        .iter()
        .map(|p| p.as_ref().to_string_lossy().into_owned())
        .collect();
    paths.sort();

    let mut hasher = Sha256::new();
    for path in &paths {
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
    }
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_16_hex_chars() {
        let fp = fingerprint(&["/a/b", "/c/d"]);
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = fingerprint(&["/a/b", "/c/d"]);
        let b = fingerprint(&["/c/d", "/a/b"]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_workspace_sets_fingerprint_differently() {
        let a = fingerprint(&["/a/b"]);
        let b = fingerprint(&["/a/b", "/c/d"]);
        assert_ne!(a, b);
    }
}

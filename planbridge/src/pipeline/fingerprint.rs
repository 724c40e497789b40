//! Input directory fingerprint
//!
//! A cheap change detector: blake3 over the sorted relative path, size and
//! modification time of every file. Contents are not read, and no ignore
//! rules apply.

use std::path::Path;
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;

/// Hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Fingerprint of every file under `dir`, or `None` when the directory is
/// missing or holds no files.
pub fn input_fingerprint(dir: &Path) -> std::io::Result<Option<String>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut entries = Vec::new();
    let walker = WalkBuilder::new(dir).standard_filters(false).build();
    for entry in walker.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let relative = path.strip_prefix(dir).unwrap_or(path);
        entries.push((relative.to_string_lossy().replace('\\', "/"), meta.len(), mtime));
    }

    if entries.is_empty() {
        return Ok(None);
    }
    entries.sort();

    let mut hasher = blake3::Hasher::new();
    for (path, size, mtime) in &entries {
        hasher.update(path.as_bytes());
        hasher.update(&[0]);
        hasher.update(size.to_string().as_bytes());
        hasher.update(&[0]);
        hasher.update(mtime.to_string().as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize().to_hex();
    Ok(Some(digest.as_str()[..FINGERPRINT_LEN].to_string()))
}

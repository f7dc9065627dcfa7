//! BLAKE3 content hashes surfaced in step DTOs.
//!
//! All hashes are rendered as `"blake3:{hex}"`.

use std::io::{self, Read};
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a string.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash a file's contents, streaming.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; STREAM_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash an installed plugin tree.
///
/// Entries are visited in sorted order and each contributes its relative
/// path and file hash, so the result depends only on content and layout.
/// Symlinks are skipped.
pub fn hash_tree(root: &Path) -> io::Result<String> {
    let mut files: Vec<(String, String)> = Vec::new();
    collect_files(root, root, &mut files)?;

    let mut hasher = blake3::Hasher::new();
    for (rel, hash) in &files {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<(String, String)>) -> io::Result<()> {
    let mut children: Vec<std::fs::DirEntry> =
        std::fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    children.sort_by_key(|e| e.file_name());

    for entry in children {
        let ft = entry.file_type()?;
        let path = entry.path();
        if ft.is_symlink() {
            continue;
        }
        if ft.is_dir() {
            collect_files(base, &path, out)?;
        } else if ft.is_file() {
            let rel = path
                .strip_prefix(base)
                .map_err(|e| io::Error::other(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            out.push((rel, hash_file(&path)?));
        }
    }
    Ok(())
}

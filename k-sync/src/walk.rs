//! Gitignore-filtered directory walk and per-file fingerprints.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{io_err, SyncError};
use crate::ignore::IgnoreSet;

/// Fingerprint of one walked file. For symlinks `sha` holds the link
/// target instead of a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub mode: u32,
    pub size: u64,
    pub sha: String,
    #[serde(default)]
    pub symlink: bool,
}

/// Walk `dir` and fingerprint every file not filtered by `.gitignore`
/// rules, keyed by path relative to `dir`.
pub fn walk_tree(dir: &Path) -> Result<BTreeMap<String, FileMeta>, SyncError> {
    let mut manifest = BTreeMap::new();
    walk(dir, &IgnoreSet::default(), &mut |path, meta| {
        let rel = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        manifest.insert(rel, fingerprint(path, meta)?);
        Ok(())
    })?;
    Ok(manifest)
}

/// Depth-first walk with per-subtree `.gitignore` augmentation. Only files
/// reach the callback; entries are visited in name order.
fn walk(
    dir: &Path,
    ignores: &IgnoreSet,
    f: &mut impl FnMut(&Path, &std::fs::Metadata) -> Result<(), SyncError>,
) -> Result<(), SyncError> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        names.push(entry.file_name());
    }
    names.sort();

    let extended;
    let ignores = if names.iter().any(|n| n == ".gitignore") {
        let path = dir.join(".gitignore");
        let content = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        extended = ignores.extended(IgnoreSet::parse(&dir.to_string_lossy(), &content)?);
        &extended
    } else {
        ignores
    };

    for name in names {
        let path = dir.join(&name);
        if ignores.is_ignored(&path.to_string_lossy()) {
            continue;
        }
        let meta = std::fs::symlink_metadata(&path).map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            walk(&path, ignores, f)?;
        } else {
            f(&path, &meta)?;
        }
    }
    Ok(())
}

fn fingerprint(path: &Path, meta: &std::fs::Metadata) -> Result<FileMeta, SyncError> {
    let mode = mode_of(meta);
    let size = meta.len();
    if meta.file_type().is_symlink() {
        let target = std::fs::read_link(path).map_err(|e| io_err(path, e))?;
        return Ok(FileMeta {
            mode,
            size,
            sha: target.to_string_lossy().into_owned(),
            symlink: true,
        });
    }
    let mut file = std::fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| io_err(path, e))?;
    Ok(FileMeta {
        mode,
        size,
        sha: hex::encode(hasher.finalize()),
        symlink: false,
    })
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}
#[cfg(not(unix))]
fn mode_of(_meta: &std::fs::Metadata) -> u32 {
    0o644
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, content).expect("write");
    }

    #[test]
    fn walk_records_relative_paths_and_digests() {
        let tmp = TempDir::new().expect("tempdir");
        write(tmp.path(), "a", "hello");
        write(tmp.path(), "sub/b", "world");
        let m = walk_tree(tmp.path()).expect("walk");
        assert_eq!(m.len(), 2);
        let a = &m["a"];
        assert_eq!(a.size, 5);
        assert_eq!(a.sha.len(), 64, "sha256 hex digest");
        assert!(m.contains_key("sub/b"));
    }

    #[test]
    fn gitignore_applies_to_its_subtree_only() {
        let tmp = TempDir::new().expect("tempdir");
        write(tmp.path(), "keep.tmp", "");
        write(tmp.path(), "sub/.gitignore", "*.tmp");
        write(tmp.path(), "sub/drop.tmp", "");
        write(tmp.path(), "sub/keep", "");
        let m = walk_tree(tmp.path()).expect("walk");
        assert!(m.contains_key("keep.tmp"), "root is outside the subtree");
        assert!(!m.contains_key("sub/drop.tmp"));
        assert!(m.contains_key("sub/keep"));
        assert!(m.contains_key("sub/.gitignore"));
    }

    #[test]
    fn git_dirs_are_skipped() {
        let tmp = TempDir::new().expect("tempdir");
        write(tmp.path(), ".git/HEAD", "ref");
        write(tmp.path(), "src", "x");
        let m = walk_tree(tmp.path()).expect("walk");
        assert_eq!(m.len(), 1);
        assert!(m.contains_key("src"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_store_the_target() {
        let tmp = TempDir::new().expect("tempdir");
        write(tmp.path(), "real", "content");
        std::os::unix::fs::symlink("real", tmp.path().join("link")).expect("symlink");
        let m = walk_tree(tmp.path()).expect("walk");
        let link = &m["link"];
        assert!(link.symlink);
        assert_eq!(link.sha, "real");
    }
}

//! The systemd generator: copy the synced unit tree into the runtime
//! directory systemd hands us.
//!
//! Generator contract: argv[1] is the output directory for normal units,
//! argv[2] early, argv[3] late. Only the normal directory is used. The
//! `k/` payload directory (routing table, env files) is not copied —
//! units reference it in place under /opt/k/_.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::paths;

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Output directory for normal units.
    pub dir: PathBuf,

    /// Output directory for early units (unused).
    pub early_dir: Option<PathBuf>,

    /// Output directory for late units (unused).
    pub late_dir: Option<PathBuf>,
}

impl GenerateArgs {
    pub fn run(self) -> Result<()> {
        let config_dir = paths::root()?.join(paths::CONFIG_LINK);
        copy_units(&config_dir, &self.dir)
    }
}

/// Entry point for argv[0] dispatch (`.../k-generator <dir> [early] [late]`).
pub fn run_generator(dirs: Vec<PathBuf>) -> Result<()> {
    let Some(dir) = dirs.first() else {
        bail!("generator invoked without an output directory");
    };
    let config_dir = paths::root()?.join(paths::CONFIG_LINK);
    copy_units(&config_dir, dir)
}

/// Copy unit files and `*.wants` symlink trees; skip the `k/` payload dir.
fn copy_units(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in std::fs::read_dir(src).with_context(|| format!("read {}", src.display()))? {
        let entry = entry.with_context(|| format!("read {}", src.display()))?;
        let name = entry.file_name();
        if name == "k" {
            continue;
        }
        let path = entry.path();
        let target = dst.join(&name);
        let meta = std::fs::symlink_metadata(&path)
            .with_context(|| format!("stat {}", path.display()))?;
        if meta.is_dir() {
            if name.to_string_lossy().ends_with(".wants") {
                copy_units(&path, &target)?;
            }
            continue;
        }
        if meta.file_type().is_symlink() {
            let link = std::fs::read_link(&path)
                .with_context(|| format!("readlink {}", path.display()))?;
            match std::fs::remove_file(&target) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("replace {}", target.display()))
                }
            }
            symlink(&link, &target)?;
        } else {
            std::fs::copy(&path, &target)
                .with_context(|| format!("copy {}", path.display()))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(original, link)
        .with_context(|| format!("link {}", link.display()))
}
#[cfg(not(unix))]
fn symlink(_original: &Path, link: &Path) -> Result<()> {
    bail!("cannot create {} on a non-unix host", link.display())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn copies_units_and_wants_but_not_the_payload_dir() {
        let tmp = TempDir::new().expect("tempdir");
        let src = tmp.path().join("config");
        let dst = tmp.path().join("out");
        std::fs::create_dir_all(src.join("multi-user.target.wants")).expect("mkdir");
        std::fs::create_dir_all(src.join("k")).expect("mkdir");
        std::fs::write(src.join("k.target"), "# generated by k\n").expect("write");
        std::fs::write(src.join("k").join("k-http.json"), "{}").expect("write");
        std::os::unix::fs::symlink(
            "../k.target",
            src.join("multi-user.target.wants").join("k.target"),
        )
        .expect("symlink");

        copy_units(&src, &dst).expect("copy");

        assert!(dst.join("k.target").exists());
        assert!(!dst.join("k").exists(), "payload dir must not be copied");
        let link =
            std::fs::read_link(dst.join("multi-user.target.wants").join("k.target")).expect("link");
        assert_eq!(link, Path::new("../k.target"));
    }
}

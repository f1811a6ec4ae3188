//! `k init <dir>` — point the config symlink at `dir` and set up the vault.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use k_core::Vault;

use crate::paths;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory holding (or about to hold) k.yaml and the app configs.
    pub dir: PathBuf,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create {}", self.dir.display()))?;
        let dir = std::fs::canonicalize(&self.dir)
            .with_context(|| format!("resolve {}", self.dir.display()))?;

        let root = paths::root()?;
        std::fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;
        let link = root.join(paths::CONFIG_LINK);
        match std::fs::symlink_metadata(&link) {
            Ok(_) => std::fs::remove_file(&link)
                .with_context(|| format!("replace {}", link.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err).with_context(|| format!("stat {}", link.display())),
        }
        symlink(&dir, &link)?;

        Vault::open(&root.join(paths::VAULT_KEY), true).context("set up vault")?;
        println!("Initialized k in {}", dir.display());
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(dir: &std::path::Path, link: &std::path::Path) -> Result<()> {
    std::os::unix::fs::symlink(dir, link)
        .with_context(|| format!("link {} -> {}", link.display(), dir.display()))
}
#[cfg(not(unix))]
fn symlink(_dir: &std::path::Path, _link: &std::path::Path) -> Result<()> {
    anyhow::bail!("k init requires a unix host")
}

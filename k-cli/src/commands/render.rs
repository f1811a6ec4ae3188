//! `k render <dir>` — render the config tree locally, for inspection and
//! drift checks.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::load;
use crate::paths;

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Output directory for the rendered tree.
    pub dir: PathBuf,
}

impl RenderArgs {
    pub fn run(self) -> Result<()> {
        let (config, _) = load::load_config()?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create {}", self.dir.display()))?;
        k_renderer::render(&config, &self.dir, paths::SERVER_BIN)?;
        println!("Rendered config into {}", self.dir.display());
        Ok(())
    }
}

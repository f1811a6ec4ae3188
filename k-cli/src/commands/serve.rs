//! `k serve <config-path>` — run the HTTP router (the ExecStart of
//! k-http.service).

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to the rendered routing table (k-http.json).
    pub config_path: PathBuf,
}

impl ServeArgs {
    pub fn run(self) -> Result<()> {
        k_server::start(&self.config_path)?;
        Ok(())
    }
}

//! `k encrypt` / `k decrypt` — vault values for config templates.

use anyhow::{Context, Result};
use clap::Args;

use k_core::Vault;

use crate::paths;

#[derive(Args, Debug)]
pub struct EncryptArgs {
    /// Value to encrypt.
    pub plain_text: String,
}

impl EncryptArgs {
    pub fn run(self) -> Result<()> {
        let root = paths::root()?;
        let vault = Vault::open(&root.join(paths::VAULT_KEY), true)?;
        let encrypted = vault.encrypt(&self.plain_text)?;
        println!("{{{{ decrypt(s=\"{encrypted}\") }}}}");
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct DecryptArgs {
    /// Encrypted value, bare or wrapped in its template snippet.
    pub cipher_text: String,
}

impl DecryptArgs {
    pub fn run(self) -> Result<()> {
        let re = regex::Regex::new(r"[\w+/=]{24,}").context("encrypted value pattern")?;
        let value = re
            .find(&self.cipher_text)
            .context("arg does not contain an encrypted value")?;
        let root = paths::root()?;
        let vault = Vault::open(&root.join(paths::VAULT_KEY), true)?;
        println!("{}", vault.decrypt(value.as_str())?);
        Ok(())
    }
}

//! `k sign <file> <sigfile>` — detached ed25519 signatures with a
//! generate-on-first-use key.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use ed25519_dalek::{Signer as _, SigningKey};

use crate::paths;

#[derive(Args, Debug)]
pub struct SignArgs {
    /// File to sign.
    pub file: PathBuf,

    /// Where to write the 64-byte signature.
    pub sig_file: PathBuf,
}

impl SignArgs {
    pub fn run(self) -> Result<()> {
        let root = paths::root()?;
        let key_path = root.join(paths::SIGN_KEY);
        let signing_key = match std::fs::read(&key_path) {
            Ok(bytes) => {
                let seed: [u8; 32] = bytes.try_into().map_err(|_| {
                    anyhow!("sign key at {} is not a 32 byte seed", key_path.display())
                })?;
                SigningKey::from_bytes(&seed)
            }
            Err(_) => {
                let key = SigningKey::generate(&mut rand::rngs::OsRng);
                std::fs::create_dir_all(&root)
                    .with_context(|| format!("create {}", root.display()))?;
                std::fs::write(&key_path, key.to_bytes())
                    .with_context(|| format!("write {}", key_path.display()))?;
                set_key_mode(&key_path)?;
                key
            }
        };

        let data = std::fs::read(&self.file)
            .with_context(|| format!("read {}", self.file.display()))?;
        let signature = signing_key.sign(&data);
        println!(
            "signature: {}\npublic key: {}\n  (verify with ed25519)",
            hex::encode(signature.to_bytes()),
            hex::encode(signing_key.verifying_key().to_bytes()),
        );
        std::fs::write(&self.sig_file, signature.to_bytes())
            .with_context(|| format!("write {}", self.sig_file.display()))?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_key_mode(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("chmod {}", path.display()))
}
#[cfg(not(unix))]
fn set_key_mode(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

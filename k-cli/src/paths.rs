//! Client/server filesystem layout and root detection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const SERVER_ROOT: &str = "/opt/k";
/// The installed binary on the server.
pub const SERVER_BIN: &str = "/opt/k/_k_";
/// Symlink under the root pointing at the user's config directory.
pub const CONFIG_LINK: &str = "_";
/// The synced rendered-config tree on the server.
pub const REMOTE_CONFIG_DIR: &str = "/opt/k/_";
pub const VAULT_KEY: &str = "vault.key";
pub const SIGN_KEY: &str = "sign.key";
pub const GENERATOR_LINK: &str = "/etc/systemd/system-generators/k-generator";

pub fn client_root() -> Result<PathBuf> {
    let home = dirs::home_dir().context("cannot determine home directory; set $HOME")?;
    Ok(home.join(".config").join("k"))
}

/// `$K_ROOT` wins; an empty `$DISPLAY` means we are the server; otherwise
/// the client root under `$HOME`.
pub fn root() -> Result<PathBuf> {
    if let Ok(k_root) = std::env::var("K_ROOT") {
        if !k_root.is_empty() {
            return Ok(PathBuf::from(k_root));
        }
    }
    if std::env::var("DISPLAY").map_or(true, |v| v.is_empty()) {
        return Ok(PathBuf::from(SERVER_ROOT));
    }
    client_root()
}

/// The vault may only be created interactively on the client.
pub fn is_client(root: &Path) -> bool {
    client_root().map(|c| c == root).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_bin_lives_under_the_server_root() {
        assert!(SERVER_BIN.starts_with(SERVER_ROOT));
        assert!(REMOTE_CONFIG_DIR.starts_with(SERVER_ROOT));
    }
}

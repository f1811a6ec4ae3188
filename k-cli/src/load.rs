//! Config loading glue: root resolution, the lazily-opened vault behind
//! the template `decrypt` function, and cwd-based app detection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use k_core::{Config, Vault};

use crate::paths;

/// Load the config tree behind `<root>/_`, with `decrypt` wired to the
/// vault key under the same root. `$DEV` overrides the target to
/// `root@localhost`.
pub fn load_config() -> Result<(Config, PathBuf)> {
    let root = paths::root()?;
    let link = root.join(paths::CONFIG_LINK);
    let dir = std::fs::canonicalize(&link)
        .with_context(|| format!("config: resolve {}", link.display()))?;
    let decrypt = Decrypt::new(root.join(paths::VAULT_KEY), paths::is_client(&root));
    let mut config = k_core::config::load(&dir, move |tera| {
        tera.register_function("decrypt", decrypt.clone());
    })
    .context("config")?;
    if std::env::var("DEV").is_ok_and(|v| !v.is_empty()) {
        config.user = "root".to_string();
        config.host = "localhost".to_string();
    }
    Ok((config, dir))
}

/// The app of the current directory: the first path component of cwd
/// relative to the config directory's parent.
pub fn app_name_from_cwd(config_dir: &Path) -> Result<String> {
    let cwd = std::env::current_dir().context("current directory")?;
    let parent = config_dir
        .parent()
        .context("config directory has no parent")?;
    let rel = cwd
        .strip_prefix(parent)
        .context("current directory is not an app checkout next to the config directory")?;
    let first = rel
        .components()
        .next()
        .context("cannot derive an app name from the current directory")?;
    Ok(first.as_os_str().to_string_lossy().into_owned())
}

/// Template function decrypting vault values. The vault is opened on first
/// use only — configs without secrets never prompt.
#[derive(Clone)]
pub struct Decrypt {
    path: PathBuf,
    create: bool,
    vault: Arc<Mutex<Option<Vault>>>,
}

impl Decrypt {
    pub fn new(path: PathBuf, create: bool) -> Decrypt {
        Decrypt {
            path,
            create,
            vault: Arc::new(Mutex::new(None)),
        }
    }
}

impl tera::Function for Decrypt {
    fn call(&self, args: &HashMap<String, tera::Value>) -> tera::Result<tera::Value> {
        let value = args
            .get("s")
            .and_then(tera::Value::as_str)
            .ok_or_else(|| tera::Error::msg("decrypt requires a string argument: decrypt(s=\"…\")"))?;
        let mut guard = self
            .vault
            .lock()
            .map_err(|_| tera::Error::msg("vault lock poisoned"))?;
        if guard.is_none() {
            let vault = Vault::open(&self.path, self.create)
                .map_err(|err| tera::Error::msg(err.to_string()))?;
            *guard = Some(vault);
        }
        let Some(vault) = guard.as_ref() else {
            return Err(tera::Error::msg("vault unavailable"));
        };
        vault
            .decrypt(value)
            .map(tera::Value::String)
            .map_err(|err| tera::Error::msg(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_the_first_component_after_the_config_parent() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let base = std::fs::canonicalize(tmp.path()).expect("canonicalize");
        let config_dir = base.join("config");
        let app_dir = base.join("myapp").join("src");
        std::fs::create_dir_all(&config_dir).expect("mkdir");
        std::fs::create_dir_all(&app_dir).expect("mkdir");
        let prev = std::env::current_dir().expect("cwd");
        std::env::set_current_dir(&app_dir).expect("chdir");
        let name = app_name_from_cwd(&config_dir).expect("app name");
        std::env::set_current_dir(prev).expect("chdir back");
        assert_eq!(name, "myapp");
    }
}

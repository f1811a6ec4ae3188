//! `k deploy [app]` — install the binary, sync the rendered config tree,
//! then sync app sources in dependency order and restart what changed.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use k_core::Config;

use crate::load;
use crate::paths;
use crate::ssh::{self, Ssh};

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// App to deploy; defaults to the app of the current directory.
    pub app: Option<String>,

    /// Upload the binary even when the remote version matches.
    #[arg(long)]
    pub force_install: bool,
}

impl DeployArgs {
    pub fn run(self) -> Result<()> {
        let (config, config_dir) = load::load_config()?;
        let config_name = config_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match self.app {
            Some(app) => app,
            None => load::app_name_from_cwd(&config_dir)?,
        };
        if name != config_name && !config.apps.contains_key(&name) {
            bail!("'{name}' is not a valid app");
        }

        let ssh = Ssh::new(&config.user, &config.host);
        remote_install(&ssh, self.force_install)?;
        let root = paths::root()?;
        ssh.upload(
            &root.join(paths::VAULT_KEY),
            &format!("{}/{}", paths::SERVER_ROOT, paths::VAULT_KEY),
        )?;

        let n = push_config(&ssh, &config)?;
        if n > 0 {
            println!("config changed ({n} paths), restarting k-http.target");
            ssh.exec(
                "systemctl daemon-reload\nsystemctl restart k-http.target",
                false,
                &[],
            )?;
        }
        if name == config_name {
            return Ok(());
        }

        for app_name in deploy_order(&config, &name) {
            deploy_one(&ssh, &config, &config_dir, &app_name)?;
        }
        Ok(())
    }
}

/// Render into a throwaway directory and sync it to the server's config
/// tree. Returns the receiver's change count.
pub fn push_config(ssh: &Ssh, config: &Config) -> Result<u64> {
    let tmp = tempfile::tempdir().context("create temp render dir")?;
    k_renderer::render(config, tmp.path(), paths::SERVER_BIN).context("render config")?;
    sync_tree(ssh, tmp.path(), paths::REMOTE_CONFIG_DIR)
}

/// `name` preceded by its transitive dependencies, depth-first in
/// declaration order, each app once.
fn deploy_order(config: &Config, name: &str) -> Vec<String> {
    fn visit(config: &Config, name: &str, seen: &mut BTreeSet<String>, order: &mut Vec<String>) {
        if !seen.insert(name.to_string()) {
            return;
        }
        if let Some(app) = config.apps.get(name) {
            for dep in &app.dependencies {
                visit(config, dep, seen, order);
            }
        }
        order.push(name.to_string());
    }
    let mut seen = BTreeSet::new();
    let mut order = Vec::new();
    visit(config, name, &mut seen, &mut order);
    order
}

fn deploy_one(ssh: &Ssh, config: &Config, config_dir: &Path, name: &str) -> Result<()> {
    let app = config
        .apps
        .get(name)
        .with_context(|| format!("'{name}' is not a valid app"))?;
    let remote_dir = format!("{}/{name}", paths::SERVER_ROOT);

    if let Some(script) = &app.deploy {
        ssh.exec(&format!("mkdir -p '{remote_dir}'"), false, &[])?;
        ssh::exec_local(&format!("set -x;{script}"), &[], false)
            .with_context(|| format!("deploy script for '{name}'"))?;
        ssh.exec(&format!("systemctl restart {name}.target"), false, &[])?;
        return Ok(());
    }

    let src = config_dir
        .parent()
        .context("config directory has no parent")?
        .join(name);
    println!("Syncing {name}:");
    let n = sync_tree(ssh, &src, &remote_dir)?;
    if n == 0 {
        println!("  {name} unchanged");
        return Ok(());
    }
    let mut script = String::new();
    if let Some(build) = &app.build {
        script.push_str(&format!("cd '{remote_dir}'\n{build}\n"));
    }
    script.push_str(&format!("systemctl restart {name}.target"));
    ssh.exec(&script, false, &[])?;
    Ok(())
}

/// Run the sync pipe against a `k receive` spawned on the remote.
pub fn sync_tree(ssh: &Ssh, local: &Path, remote: &str) -> Result<u64> {
    let mut child = ssh.pipe(&format!("{} receive", paths::SERVER_BIN))?;
    let stdout = child.stdout.take().context("remote receiver stdout")?;
    let stdin = child.stdin.take().context("remote receiver stdin")?;
    let mut pipe = k_sync::Pipe::new(stdout, stdin);
    let result = pipe.send(local, remote);
    drop(pipe);
    let status = child.wait().context("wait for remote receiver")?;
    let n = result.with_context(|| format!("sync {} -> {remote}", local.display()))?;
    if !status.success() {
        bail!("remote receiver failed: {status}");
    }
    Ok(n)
}

pub(crate) fn remote_install(ssh: &Ssh, force: bool) -> Result<()> {
    let local_version = env!("CARGO_PKG_VERSION");
    let remote_version = ssh.exec(
        &format!("{} version || true", paths::SERVER_BIN),
        true,
        &[],
    )?;
    if force || remote_version != local_version {
        if !remote_version.is_empty() && !remote_version.contains("not found") {
            println!("k version mismatch: client='{local_version}', server='{remote_version}'");
        }
        println!("Copying k binary to server...");
        let exe = std::env::current_exe().context("locate current executable")?;
        ssh.upload(&exe, paths::SERVER_BIN)?;
    }
    ssh.exec(
        &format!(
            "mkdir -p /etc/systemd/system-generators\nln -sf \"$k\" {}",
            paths::GENERATOR_LINK
        ),
        false,
        &[("k", paths::SERVER_BIN.to_string())],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use k_core::App;

    fn config_with_deps(deps: &[(&str, &[&str])]) -> Config {
        let mut config = Config::default();
        for (name, dependencies) in deps {
            config.apps.insert(
                name.to_string(),
                App {
                    dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                    ..App::default()
                },
            );
        }
        config
    }

    #[test]
    fn dependencies_deploy_before_the_app() {
        let config = config_with_deps(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        assert_eq!(deploy_order(&config, "a"), vec!["c", "b", "a"]);
    }

    #[test]
    fn declaration_order_is_preserved() {
        let config = config_with_deps(&[("a", &["x", "y"]), ("x", &[]), ("y", &[])]);
        assert_eq!(deploy_order(&config, "a"), vec!["x", "y", "a"]);
    }

    #[test]
    fn an_app_without_dependencies_deploys_alone() {
        let config = config_with_deps(&[("solo", &[])]);
        assert_eq!(deploy_order(&config, "solo"), vec!["solo"]);
    }
}

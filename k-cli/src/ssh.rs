//! Remote and local shell plumbing.
//!
//! The SSH transport is the operator's `ssh` binary: agent auth via
//! `$SSH_AUTH_SOCK` comes for free, and host keys are deliberately not
//! checked — this tool only talks to hosts the operator already owns.
//! Every script runs under `set -euo pipefail` with env assignments
//! prepended as quoted `KEY="VALUE"` lines.

use std::path::Path;
use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context, Result};

pub struct Ssh {
    destination: String,
}

impl Ssh {
    pub fn new(user: &str, host: &str) -> Ssh {
        Ssh {
            destination: format!("{user}@{host}"),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("LogLevel=ERROR")
            .arg(&self.destination);
        cmd
    }

    /// Run `script` on the remote. With `capture`, stdout and stderr are
    /// collected and returned trimmed; otherwise they stream to ours.
    pub fn exec(&self, script: &str, capture: bool, env: &[(&str, String)]) -> Result<String> {
        let mut full = shell_preamble(env);
        if capture {
            full.push_str("exec 2>&1\n");
        }
        full.push_str(script);
        let mut cmd = self.command();
        cmd.arg(full);
        if capture {
            let output = cmd
                .stdin(Stdio::null())
                .output()
                .with_context(|| format!("ssh {}", self.destination))?;
            let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !output.status.success() {
                bail!("remote command failed ({}): {text}", output.status);
            }
            Ok(text)
        } else {
            let status = cmd
                .status()
                .with_context(|| format!("ssh {}", self.destination))?;
            if !status.success() {
                bail!("remote command failed: {status}");
            }
            Ok(String::new())
        }
    }

    /// Stream `local` to `<remote>.tmp`, then chmod + rename into place —
    /// a running executable cannot be overwritten, a rename works.
    pub fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let file = std::fs::File::open(local)
            .with_context(|| format!("open {}", local.display()))?;
        let mode = file_mode(&file)?;
        let dir = remote.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(".");
        let script = format!(
            "set -euo pipefail\nmkdir -p '{dir}'\ncat > '{remote}.tmp'\n\
             chmod {mode:o} '{remote}.tmp'\nmv '{remote}.tmp' '{remote}'"
        );
        let status = self
            .command()
            .arg(script)
            .stdin(Stdio::from(file))
            .status()
            .with_context(|| format!("ssh {}", self.destination))?;
        if !status.success() {
            bail!("upload of {} failed: {status}", local.display());
        }
        Ok(())
    }

    /// Spawn `remote_command` with piped stdin/stdout — the byte stream the
    /// sync pipe runs over.
    pub fn pipe(&self, remote_command: &str) -> Result<Child> {
        self.command()
            .arg(remote_command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("ssh {}", self.destination))
    }

    /// `ssh -N -R <remote>:<local>`: listen on the remote, proxy every
    /// connection to `local_addr`. Blocks until the connection drops.
    pub fn reverse_tunnel(
        &self,
        local_addr: &str,
        remote_addr: &str,
    ) -> Result<std::process::ExitStatus> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("ExitOnForwardFailure=yes")
            .arg("-N")
            .arg("-R")
            .arg(format!("{remote_addr}:{local_addr}"))
            .arg(&self.destination);
        cmd.status()
            .with_context(|| format!("ssh -R to {}", self.destination))
    }
}

/// Run `script` locally under the same preamble rules as remote scripts.
pub fn exec_local(script: &str, env: &[(&str, String)], capture: bool) -> Result<String> {
    let full = shell_preamble(env) + script;
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(full);
    if capture {
        let output = cmd.output().context("run local script")?;
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            bail!("local command failed ({}): {text}", output.status);
        }
        Ok(text)
    } else {
        let status = cmd.status().context("run local script")?;
        if !status.success() {
            bail!("local command failed: {status}");
        }
        Ok(String::new())
    }
}

fn shell_preamble(env: &[(&str, String)]) -> String {
    let mut s = String::from("set -euo pipefail;\n");
    for (k, v) in env {
        s.push_str(&format!("{k}=\"{v}\"\n"));
    }
    s
}

#[cfg(unix)]
fn file_mode(file: &std::fs::File) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(file.metadata().context("stat upload source")?.permissions().mode() & 0o7777)
}
#[cfg(not(unix))]
fn file_mode(_file: &std::fs::File) -> Result<u32> {
    Ok(0o755)
}

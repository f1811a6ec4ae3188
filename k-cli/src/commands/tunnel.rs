//! `k tunnel <local-address>` — expose a local server through the remote
//! router's tunnel route.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;

use crate::commands::deploy;
use crate::load;
use crate::ssh::Ssh;

#[derive(Args, Debug)]
pub struct TunnelArgs {
    /// Local address to expose, e.g. 127.0.0.1:3000.
    pub local_address: String,
}

impl TunnelArgs {
    pub fn run(self) -> Result<()> {
        let (config, _) = load::load_config()?;
        if config.tunnel.pattern.is_empty() {
            bail!("Tunnel.Pattern not configured");
        }
        let ssh = Ssh::new(&config.user, &config.host);
        deploy::remote_install(&ssh, false)?;
        let n = deploy::push_config(&ssh, &config)?;
        if n > 0 {
            ssh.exec("systemctl daemon-reload", false, &[])?;
        }
        ssh.exec("systemctl restart k-http.target", false, &[])?;

        loop {
            println!(
                "opening tunnel: 'http://{}' -> {}",
                config.tunnel.pattern, self.local_address
            );
            match ssh.reverse_tunnel(&self.local_address, &config.tunnel.address) {
                Ok(status) => println!("tunnel exited with: {status}"),
                Err(err) => println!("tunnel failed: {err}"),
            }
            std::thread::sleep(Duration::from_secs(1));
        }
    }
}

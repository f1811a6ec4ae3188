//! The systemctl command family: start/stop/reload/restart/status/logs.

use anyhow::Result;
use clap::Args;

use crate::load;
use crate::ssh::Ssh;

#[derive(Args, Debug)]
pub struct UnitArgs {
    /// App name; defaults to the app of the current directory.
    pub app: Option<String>,
}

pub fn run(cmd: &str, args: UnitArgs) -> Result<()> {
    let (config, config_dir) = load::load_config()?;
    let unit = match args.app {
        Some(app) => app,
        None => load::app_name_from_cwd(&config_dir)?,
    };
    let script = match cmd {
        "logs" => format!("journalctl K={unit}"),
        "status" => {
            let unit = if unit.contains('.') {
                unit
            } else {
                format!("{unit}.target")
            };
            format!("systemctl status {unit} --with-dependencies --lines 100")
        }
        _ => format!("systemctl {cmd} {unit}"),
    };
    let ssh = Ssh::new(&config.user, &config.host);
    ssh.exec(&format!("SYSTEMD_COLORS=1 {script}"), false, &[])?;
    Ok(())
}

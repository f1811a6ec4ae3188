//! `k ls` — list all apps.

use anyhow::Result;

use crate::load;

pub fn run() -> Result<()> {
    let (config, _) = load::load_config()?;
    println!("Apps:");
    for name in config.apps.keys() {
        println!("  - {name}");
    }
    Ok(())
}

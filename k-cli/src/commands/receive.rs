//! `k receive` — the sync-pipe receiver, spawned over SSH by deploy with
//! our stdin/stdout as the transport.

use anyhow::{Context, Result};

pub fn run() -> Result<()> {
    let stdin = std::io::stdin().lock();
    let stdout = std::io::stdout().lock();
    let mut pipe = k_sync::Pipe::new(stdin, stdout);
    pipe.receive().context("receive")?;
    Ok(())
}

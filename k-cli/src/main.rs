//! k — deploy and supervise long-running apps on a systemd host.
//!
//! # Usage
//!
//! ```text
//! k init <dir>
//! k ls
//! k deploy [app] [--force-install]
//! k start|stop|reload|restart|status|logs [app]
//! k tunnel <local-address>
//! k notify <message> --app <name>
//! k encrypt <plaintext> / k decrypt <ciphertext>
//! k sign <file> <sigfile>
//! k render <dir>
//! k version
//! ```
//!
//! The same binary is the remote agent: systemd invokes it through the
//! `k-generator` symlink (argv[0] dispatch to `generate`), `k serve` runs
//! the HTTP router, and `k receive` is the sync-pipe receiver spawned over
//! SSH by `k deploy`.

mod commands;
mod load;
mod paths;
mod ssh;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    deploy::DeployArgs, generate::GenerateArgs, init::InitArgs, notify::NotifyArgs,
    render::RenderArgs, serve::ServeArgs, sign::SignArgs, systemctl::UnitArgs,
    tunnel::TunnelArgs, vault::DecryptArgs, vault::EncryptArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "k",
    version,
    about = "Deploy and supervise apps on a systemd host",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set up the provided config <dir> and the vault.
    Init(InitArgs),

    /// List all apps.
    Ls,

    /// Deploy the config tree and an app with its dependencies.
    Deploy(DeployArgs),

    /// systemctl start.
    Start(UnitArgs),

    /// systemctl stop.
    Stop(UnitArgs),

    /// systemctl reload.
    Reload(UnitArgs),

    /// systemctl restart.
    Restart(UnitArgs),

    /// Show status of an app - equivalent to systemctl status.
    Status(UnitArgs),

    /// journalctl K=<app>.
    Logs(UnitArgs),

    /// Expose a local address through the server's router.
    Tunnel(TunnelArgs),

    /// Send a message to k.Vars.telegram $bot_id:$token:$chat_id.
    Notify(NotifyArgs),

    /// Encrypt the provided <value> for embedding in config templates.
    Encrypt(EncryptArgs),

    /// Decrypt the provided <value>.
    Decrypt(DecryptArgs),

    /// Sign the provided <file> with the local ed25519 key.
    Sign(SignArgs),

    /// Render the config tree into <dir>.
    Render(RenderArgs),

    /// Print the version.
    Version,

    /// Run the HTTP router (invoked by k-http.service).
    #[command(hide = true)]
    Serve(ServeArgs),

    /// Sync-pipe receiver (invoked over SSH by deploy).
    #[command(hide = true)]
    Receive,

    /// systemd generator (invoked via the k-generator symlink).
    #[command(hide = true)]
    Generate(GenerateArgs),
}

fn main() -> Result<()> {
    init_tracing();
    if let Some(dirs) = generator_invocation() {
        return commands::generate::run_generator(dirs);
    }
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Ls => commands::ls::run(),
        Commands::Deploy(args) => args.run(),
        Commands::Start(args) => commands::systemctl::run("start", args),
        Commands::Stop(args) => commands::systemctl::run("stop", args),
        Commands::Reload(args) => commands::systemctl::run("reload", args),
        Commands::Restart(args) => commands::systemctl::run("restart", args),
        Commands::Status(args) => commands::systemctl::run("status", args),
        Commands::Logs(args) => commands::systemctl::run("logs", args),
        Commands::Tunnel(args) => args.run(),
        Commands::Notify(args) => args.run(),
        Commands::Encrypt(args) => args.run(),
        Commands::Decrypt(args) => args.run(),
        Commands::Sign(args) => args.run(),
        Commands::Render(args) => args.run(),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Serve(args) => args.run(),
        Commands::Receive => commands::receive::run(),
        Commands::Generate(args) => args.run(),
    }
}

/// systemd invokes generators by path; when argv[0] names the
/// `k-generator` symlink the remaining argv are the output directories.
fn generator_invocation() -> Option<Vec<PathBuf>> {
    let arg0 = std::env::args().next()?;
    let name = Path::new(&arg0).file_name()?.to_string_lossy().into_owned();
    if !name.contains("generator") {
        return None;
    }
    Some(std::env::args().skip(1).map(PathBuf::from).collect())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

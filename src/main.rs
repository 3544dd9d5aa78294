use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use civireply::config::{load_config, resolve_db_path};
use civireply::mail::imap_session::ImapMailbox;
use civireply::pipeline::run_once;
use civireply::store::sqlite::SqliteStore;
use civireply::trigger;

#[derive(Parser)]
#[command(name = "civireply")]
#[command(about = "Email-reply ingestion for the municipal records system", long_about = None)]
struct Cli {
    /// Path to config.toml (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// One batch run: fetch unseen replies, correlate, store, fan out
    Run,

    /// Listen for authenticated HTTP trigger requests
    Serve,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref()).map_err(|e| anyhow!("Configuration error: {e}"))?;
    let db_path = resolve_db_path(&cfg)?;
    let store = SqliteStore::open(&db_path)?;

    match cli.cmd {
        Command::Run => {
            let mut mailbox = ImapMailbox::open(
                &cfg.imap_host,
                &cfg.imap_user,
                &cfg.imap_password,
                &cfg.folder,
            )?;
            let summary = run_once(&cfg, &store, &mut mailbox)?;
            println!("{summary}");
            Ok(())
        }

        Command::Serve => trigger::serve(&cfg, &store),
    }
}

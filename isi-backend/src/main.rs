//! Process entry point. Parses CLI arguments, initializes logging,
//! bootstraps the parameter store, and runs the IPC transport loop to
//! completion. Exits 0 on clean stdin closure, 1 on a fatal startup or
//! transport error.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

/// ISI acquisition controller backend process.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to the persisted parameter file (created with defaults if missing).
    #[arg(long, default_value = "isi_params.json")]
    params_path: PathBuf,

    /// Directory under which recorded sessions are written and listed from.
    #[arg(long, default_value = "sessions")]
    sessions_root: PathBuf,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let store = Arc::new(
        isi_params::ParamStore::load_or_init(&cli.params_path)
            .map_err(|e| anyhow::anyhow!("failed to load parameter store at {:?}: {e}", cli.params_path))?,
    );

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let ctx = Arc::new(isi_ipc::AppContext::new(store, cli.sessions_root, events_tx));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow::anyhow!("failed to start async runtime: {e}"))?;

    runtime.block_on(isi_ipc::run_transport(ctx, events_rx));
    Ok(())
}

fn main() {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}

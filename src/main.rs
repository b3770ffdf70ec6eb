use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};

use goputn::config::Storage;
use goputn::input::StdinSource;
use goputn::Session;

/// gopuTN - relay commands to a remote terminal over HTTP or WebSocket
#[derive(Parser, Debug)]
#[command(name = "goputn", version, about)]
struct Args {
    /// Storage directory for config.json and history.log (overrides GOPUTN_HOME)
    #[arg(long, value_name = "DIR")]
    storage_dir: Option<PathBuf>,

    /// Server base URL for this run only (not saved)
    #[arg(short, long, value_name = "URL")]
    server: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run a single command and exit instead of starting the prompt
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let storage = match args.storage_dir {
        Some(dir) => Storage::new(dir),
        None => Storage::resolve(),
    };
    info!(dir = %storage.dir().display(), "using storage directory");

    let mut session = Session::open(storage)?;
    if let Some(server) = args.server {
        session = session.with_server_override(server);
    }

    let mut input = StdinSource::new();
    let mut out = std::io::stdout();

    if !args.command.is_empty() {
        let line = args.command.join(" ");
        session.run_once(&line, &mut input, &mut out).await?;
        return Ok(());
    }

    println!("gopuTN engine started");
    session.run(&mut input, &mut out).await?;
    println!("gopuTN engine stopped.");
    Ok(())
}

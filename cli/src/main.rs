use clap::Parser;
use tracing::Level;

use chaperone::service::{Service, TraceService};
use chaperone::session::Session;
use chaperone::{config, Result};

#[derive(Parser)]
#[command(
    name = "chaperone",
    version,
    about = "Run a command with every process it spawns intercepted and traced"
)]
struct Cli {
    /// Observe the root command only instead of re-injecting into descendants.
    #[arg(long)]
    wrap_only: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// The command to run under the session.
    #[arg(last = true, required = true, num_args = 1..)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let outcome = run_session(&cli).await?;
    std::process::exit(outcome as i32);
}

async fn run_session(cli: &Cli) -> Result<i64> {
    let proxy = config::proxy_executable()?;
    let session = Session::new(config::endpoint(), proxy);

    let wrap_only = cli.wrap_only;
    let outcome = session
        .run(&cli.command, move |id| -> Box<dyn Service> {
            Box::new(TraceService::new(id, wrap_only))
        })
        .await?;

    Ok(outcome.exit_code)
}

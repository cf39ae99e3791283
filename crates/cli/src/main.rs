//! Docket CLI
//!
//! Terminal client for the docket review pipeline: watch cases move
//! through scan, extraction, and decision in real time.

mod cmd_status;
mod cmd_watch;
mod logging;

use clap::{Parser, Subcommand};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "docket", version, about = "Follow docket cases from the terminal")]
struct Cli {
    /// WebSocket endpoint of the docket server
    #[arg(
        long,
        global = true,
        env = "DOCKET_SERVER_URL",
        default_value = "ws://127.0.0.1:4000/ws"
    )]
    server: String,

    /// Base URL of the docket server's REST API
    #[arg(
        long,
        global = true,
        env = "DOCKET_API_URL",
        default_value = "http://127.0.0.1:4000"
    )]
    api: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream live alerts, following one or more cases
    Watch {
        /// Case id to follow; repeat for several cases
        #[arg(long = "case", value_name = "CASE_ID")]
        cases: Vec<String>,
    },
    /// Check connectivity to the docket server
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _logging = logging::init_logging()?;

    match cli.command {
        Commands::Watch { cases } => cmd_watch::run(&cli.server, &cli.api, cases).await,
        Commands::Status => cmd_status::run(&cli.server, &cli.api).await,
    }
}

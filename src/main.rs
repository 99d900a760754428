use clap::{Parser, Subcommand};
use tabq::telemetry;

#[derive(Parser)]
#[command(name = "tabq", version, about = "Tabular resource API gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing();

    match cli.command {
        Command::Serve => tabq::run().await,
    }
}

use anyhow::Result;
use clap::Parser;
use pnlboard::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    pnlboard::logging::init(cli.verbose);
    cli.run().await
}

use clap::Parser;

use lanwatch_lib::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lanwatch_lib::run(Cli::parse()).await
}

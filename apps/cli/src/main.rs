//! pixivbot CLI: pick a pixiv artwork by tags, one-shot or as a chat loop on stdin.

mod commands;
mod sink;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}

//! HandbookQA CLI — retrieval-augmented question answering over an
//! employee handbook.
//!
//! Ingests the configured handbook pages into a persisted vector store and
//! answers free-text questions with cited sources.

mod commands;

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

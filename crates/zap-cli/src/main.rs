use anyhow::Result;
use clap::Parser;
use zap_cli::{init_tracing, run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}

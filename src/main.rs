use clap::Parser;
use std::process::ExitCode;
use workset::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    workset::cli::run(cli).await
}

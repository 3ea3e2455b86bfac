mod bridge;
mod cli;
mod console;
mod error;
mod lifecycle;
mod manager;
mod metrics;
mod model;
mod notify;
mod registry;
mod render;
mod scheduler;
mod topology;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_filter()))
        .format_timestamp_millis()
        .init();

    match cli::run(args).await {
        // Exit explicitly: a pending stdin read would otherwise hold up runtime shutdown.
        Ok(()) => std::process::exit(0),
        Err(e) => Err(e),
    }
}

mod cli;
mod client;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, StateCommand};
use client::ApiClient;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => commands::serve(args, cli.token).await,
        Command::Status => {
            let client = ApiClient::new(&cli.remote, cli.token)?;
            commands::status(&client).await
        }
        Command::State { command } => {
            let client = ApiClient::new(&cli.remote, cli.token)?;
            match command {
                StateCommand::Pull { id } => commands::state_pull(&client, &id).await,
                StateCommand::Push { id, file, lock_id } => {
                    commands::state_push(&client, &id, &file, lock_id.as_deref()).await
                }
                StateCommand::Lock { id, lock_id } => {
                    commands::state_lock(&client, &id, lock_id).await
                }
                StateCommand::Unlock { id, lock_id } => {
                    commands::state_unlock(&client, &id, &lock_id).await
                }
            }
        }
    }
}

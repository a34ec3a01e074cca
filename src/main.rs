//! Entry point: configuration, client construction, and exit-code policy.
//!
//! The process is disposable by design. Scheduled restarts and fatal errors
//! exit with status 1 and the deployment pipeline relaunches the bot; only a
//! clean Ctrl-C exits with 0.

mod commands;
mod config;
mod error;
mod gateway;
mod handler;
mod log;
mod restart;

use serenity::all::GatewayIntents;
use serenity::Client;
use tracing::{error, info};

use crate::config::Config;
use crate::handler::{Handler, ShardManagerKey};

#[tokio::main]
async fn main() {
    // Load before tracing for debug env vars. A missing .env is fine.
    let _ = dotenv::dotenv();

    log::install_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

/// Connects to the gateway and runs until Ctrl-C or a fatal client error.
async fn run(config: Config) -> Result<(), serenity::Error> {
    // Message content and member lists are privileged intents; both must be
    // enabled on the developer portal as well.
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.token, intents)
        .event_handler(Handler::new(config.allowed_channels))
        .await?;

    // The ready handler pulls this out to arm the restart timer.
    client
        .data
        .write()
        .await
        .insert::<ShardManagerKey>(client.shard_manager.clone());

    let shard_manager = client.shard_manager.clone();
    tokio::select! {
        result = client.start() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            shard_manager.shutdown_all().await;
            Ok(())
        }
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use feedgather::{Aggregator, Config, Health};

/// Get the default config file path (~/.config/feedgather/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("feedgather")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedgather",
    version,
    about = "Aggregate the RSS/Atom feeds a user is subscribed to"
)]
struct Args {
    /// Config file (defaults to ~/.config/feedgather/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and print every non-empty feed the user subscribes to
    List { user: String },
    /// Subscribe a user to a feed URL
    Subscribe { user: String, url: String },
    /// Remove a user's subscription to a feed URL
    Unsubscribe { user: String, url: String },
    /// Subscribe a user to every feed in an OPML file
    Import {
        user: String,
        #[arg(value_name = "OPML_FILE")]
        file: PathBuf,
    },
    /// Report whether the subscription store is usable
    Health,
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

/// Print the status reply; errors go to stderr and set a failing exit code.
fn reply(result: Result<(), feedgather::storage::StoreError>) -> Result<bool> {
    match result {
        Ok(()) => {
            print_json(&Health::OK)?;
            Ok(true)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            print_json(&Health::ERROR)?;
            Ok(false)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let aggregator = Aggregator::from_config(&config)
        .await
        .context("Failed to initialize aggregator")?;

    let ok = match args.command {
        Command::List { user } => match aggregator.get_subscriptions(&user).await {
            Ok(subs) => {
                print_json(&subs)?;
                true
            }
            Err(e) => {
                eprintln!("Error: {e}");
                print_json(&Health::ERROR)?;
                false
            }
        },
        Command::Subscribe { user, url } => {
            reply(aggregator.add_subscription(&user, &url).await)?
        }
        Command::Unsubscribe { user, url } => {
            reply(aggregator.delete_subscription(&user, &url).await)?
        }
        Command::Import { user, file } => match aggregator.import_opml(&user, &file).await {
            Ok(summary) => {
                print_json(&summary)?;
                summary.subscribed == summary.found
            }
            Err(e) => {
                eprintln!("Error: failed to import {}: {e}", file.display());
                print_json(&Health::ERROR)?;
                false
            }
        },
        Command::Health => {
            let health = aggregator.health();
            print_json(&health)?;
            health.is_ok()
        }
    };

    if let feedgather::storage::SubscriptionStore::Durable(db) = aggregator.store() {
        db.close().await;
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

//! spoke-node: short-term content storage node
//!
//! `serve` runs the retention sweeper against the configured storage path;
//! the other subcommands read and write the same store directly.

mod cli;
mod commands;
mod config;

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::warn;

use hub_core::{ContentKey, Direction, SystemClock};
use hub_logging::HubSubscriberBuilder;
use hub_spoke::Content;

use cli::{Cli, Command};
use commands::Node;
use config::NodeConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = NodeConfig::load(&cli.config)?;
    if let Some(path) = cli.storage_path {
        config.storage_path = path;
    }
    let mut log = config.log.clone();
    match cli.log_level {
        Some(level) => log.default_level = level,
        None if !cli.command.is_long_running() => log.default_level = "warn".to_string(),
        None => {}
    }
    let _guard = HubSubscriberBuilder::new().with_config(log).init();

    let node = Node::open(&config, SystemClock)
        .await
        .with_context(|| format!("opening {}", config.storage_path.display()))?;

    match cli.command {
        Command::Serve => {
            node.serve(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Unable to listen for ctrl-c");
                }
            })
            .await?;
        }

        Command::Put {
            channel,
            data,
            file,
            content_type,
            key,
        } => {
            let body = match (data, file) {
                (Some(data), _) => Bytes::from(data),
                (None, Some(path)) => Bytes::from(
                    tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?,
                ),
                (None, None) => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    Bytes::from(buf)
                }
            };
            let mut content = Content::new(body);
            content.content_type = content_type;
            let key = node.put(&channel, content, key).await?;
            println!("{}", key);
        }

        Command::Get { channel, key } => {
            let content = node.get(&channel, &key).await?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&content.data)?;
            stdout.flush()?;
        }

        Command::Next {
            channel,
            key,
            count,
            unstable,
        } => {
            let keys = node.step(&channel, key, Direction::Next, count, !unstable).await?;
            print_keys(keys);
        }

        Command::Previous {
            channel,
            key,
            count,
        } => {
            let keys = node.step(&channel, key, Direction::Previous, count, true).await?;
            print_keys(keys);
        }

        Command::Latest { channel, unstable } => {
            print_keys(node.latest(&channel, !unstable).await);
        }

        Command::Earliest { channel } => {
            print_keys(node.earliest(&channel).await?);
        }

        Command::List {
            channel,
            bucket,
            unstable,
        } => {
            print_keys(node.list(&channel, bucket.as_ref(), !unstable).await);
        }

        Command::Sweep => {
            let report = node.sweep().await;
            println!("Cycle:          {}", report.cycle);
            println!("Channels swept: {}", report.channels_swept);
            println!("Items evicted:  {}", report.items_evicted);
            println!("Failures:       {}", report.failures);
            match (report.oldest_channel, report.oldest_item_age) {
                (Some(channel), Some(age)) => {
                    println!("Oldest item:    {}s in {}", age.as_secs(), channel)
                }
                _ => println!("Oldest item:    none"),
            }
            println!("Runtime:        {:?}", report.runtime);
        }

        Command::Follow {
            channel,
            cursor,
            from,
            batch,
            idle_ms,
        } => {
            let follow = node.follow(
                &channel,
                &cursor,
                from,
                batch,
                Duration::from_millis(idle_ms),
                |keys| {
                    for key in keys {
                        println!("{}", key);
                    }
                    true
                },
            );
            tokio::select! {
                _ = follow => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
    }

    Ok(())
}

fn print_keys(keys: impl IntoIterator<Item = ContentKey>) {
    for key in keys {
        println!("{}", key);
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hub_core::{ContentKey, ContentPath, TimeBucket};

use crate::config::DEFAULT_CONFIG_FILE;

#[derive(Parser)]
#[command(name = "spoke-node", version, about = "Short-term content storage node")]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    /// Override the configured storage path
    #[arg(long)]
    pub storage_path: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the retention sweeper until interrupted
    Serve,
    /// Store an item and print its key
    Put {
        channel: String,
        /// Item body; read from stdin when neither --data nor --file is given
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,
        /// Read the item body from a file
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        content_type: Option<String>,
        /// Write under this key instead of minting one (historical insert)
        #[arg(long)]
        key: Option<ContentKey>,
    },
    /// Write an item's body to stdout
    Get { channel: String, key: ContentKey },
    /// Print keys after a key
    Next {
        channel: String,
        key: ContentKey,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        /// Include keys newer than stable time
        #[arg(long)]
        unstable: bool,
    },
    /// Print keys before a key
    Previous {
        channel: String,
        key: ContentKey,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Print the newest key
    Latest {
        channel: String,
        #[arg(long)]
        unstable: bool,
    },
    /// Print the oldest key inside the retention window
    Earliest { channel: String },
    /// Print the keys of a time bucket, or of the whole channel
    List {
        channel: String,
        bucket: Option<TimeBucket>,
        #[arg(long)]
        unstable: bool,
    },
    /// Run one retention cycle and print its report
    Sweep,
    /// Print keys as they become stable, until interrupted
    Follow {
        channel: String,
        /// Cursor name
        #[arg(long, default_value = "cli")]
        cursor: String,
        /// Start after this key or bucket (default: the current minute)
        #[arg(long)]
        from: Option<ContentPath>,
        #[arg(long, default_value_t = 100)]
        batch: usize,
        /// Poll interval when caught up, in milliseconds
        #[arg(long, default_value_t = 1000)]
        idle_ms: u64,
    },
}

impl Command {
    /// One-shot commands keep logging quiet unless a level is asked for
    pub fn is_long_running(&self) -> bool {
        matches!(self, Command::Serve | Command::Follow { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_next() {
        let cli = Cli::try_parse_from([
            "spoke-node",
            "--storage-path",
            "/tmp/spoke",
            "next",
            "flights",
            "2014/11/18/00/57/24/015/abcdef",
            "-n",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.storage_path, Some(PathBuf::from("/tmp/spoke")));
        match cli.command {
            Command::Next { channel, key, count, unstable } => {
                assert_eq!(channel, "flights");
                assert_eq!(key.hash(), "abcdef");
                assert_eq!(count, 5);
                assert!(!unstable);
            }
            _ => panic!("expected next"),
        }
    }

    #[test]
    fn test_rejects_bad_key() {
        assert!(Cli::try_parse_from(["spoke-node", "get", "flights", "2014/11/18"]).is_err());
    }

    #[test]
    fn test_list_bucket_is_optional() {
        let cli = Cli::try_parse_from(["spoke-node", "list", "flights", "2014/11/18/00"]).unwrap();
        assert!(matches!(cli.command, Command::List { bucket: Some(_), .. }));
        let cli = Cli::try_parse_from(["spoke-node", "list", "flights"]).unwrap();
        assert!(matches!(cli.command, Command::List { bucket: None, .. }));
        assert!(!cli.command.is_long_running());
    }
}

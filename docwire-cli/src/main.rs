//! docwire-cli - Command-line interface for docwire
//!
//! Runs one operation against a server and prints the result.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use docwire_client::{parse_url, Pool};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docwire-cli")]
#[command(about = "Command-line client for legacy wire-protocol document databases")]
#[command(version)]
struct Cli {
    /// Connection URL: mongodb://[user:pass@]host[:port][/database][?options]
    #[arg(
        short,
        long,
        env = "DOCWIRE_URL",
        default_value = "mongodb://127.0.0.1:27017/test"
    )]
    url: String,

    /// Confirm every write with getLastError
    #[arg(long)]
    safe: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ping the server
    Ping,

    /// Query a collection
    Find {
        /// Collection name (in the URL's database)
        collection: String,

        /// Filter JSON (or @file.json)
        #[arg(default_value = "{}")]
        filter: String,

        /// Sort JSON, e.g. '{"age": -1}'
        #[arg(long)]
        sort: Option<String>,

        /// Maximum documents to return (0 = all)
        #[arg(short, long, default_value_t = 0)]
        limit: u32,

        /// Documents to skip
        #[arg(long, default_value_t = 0)]
        skip: u32,

        /// Documents per round-trip (0 = server default)
        #[arg(short, long, default_value_t = 0)]
        batch_size: u32,

        /// Field selector JSON
        #[arg(long)]
        fields: Option<String>,
    },

    /// Insert documents
    Insert {
        /// Collection name
        collection: String,

        /// Document JSON, or an array of documents (or @file.json)
        documents: String,
    },

    /// Update documents matching a selector
    Update {
        /// Collection name
        collection: String,

        /// Selector JSON
        selector: String,

        /// Update JSON (operators or replacement document)
        update: String,

        /// Insert if nothing matches
        #[arg(long)]
        upsert: bool,

        /// Update every matching document
        #[arg(long)]
        multi: bool,
    },

    /// Remove documents matching a selector
    Remove {
        /// Collection name
        collection: String,

        /// Selector JSON
        #[arg(default_value = "{}")]
        selector: String,

        /// Remove at most one document
        #[arg(long)]
        single: bool,
    },

    /// Run a database command
    Command {
        /// Command JSON, e.g. '{"ping": 1}'
        command: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let (mut config, pool_config) = match parse_url(&cli.url) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}: {}", "Invalid URL".red(), e);
            std::process::exit(2);
        }
    };
    if cli.safe {
        config = config.with_safe(true);
    }

    let database = config
        .auth
        .as_ref()
        .map(|auth| auth.database.clone())
        .unwrap_or_else(|| "test".to_string());
    tracing::debug!("Using {} on {}", database, config.addr());

    let pool = Pool::from_config(config, pool_config);
    let result = commands::execute(&pool, &database, cli.command).await;
    pool.close();

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}

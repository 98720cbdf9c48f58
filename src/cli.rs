//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Client credentials demo: token acquisition and a bearer-protected API
#[derive(Parser, Debug)]
#[command(name = "rewards-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "REWARDS_AUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "REWARDS_AUTH_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "REWARDS_AUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the protected rewards API (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "REWARDS_AUTH_PORT")]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long, env = "REWARDS_AUTH_HOST")]
        host: Option<String>,
    },

    /// Print the issuer's discovery document
    Discover {
        /// Issuer URL (overrides `client.issuer`)
        #[arg(long)]
        issuer: Option<String>,
    },

    /// Request a client credentials token and print it
    Token,

    /// Request a token and call the protected API with it
    Call {
        /// API base URL (overrides `client.api_base_url`)
        #[arg(long)]
        api_base_url: Option<String>,
    },
}

//! rewards-auth - protected rewards API and its client credentials caller

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use rewards_auth::{
    cli::{Cli, Command},
    config::Config,
    console::Console,
    server, setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let command = cli.command.unwrap_or(Command::Serve {
        port: None,
        host: None,
    });
    match apply_command(command, &mut config) {
        None => run_server(config).await,
        Some(console) => run_console(console, &config).await,
    }
}

/// Console flows, with their overrides already applied to the config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    Discover,
    Token,
    Call,
}

/// Fold command-line overrides into `config`. `None` means serve the API.
fn apply_command(command: Command, config: &mut Config) -> Option<ConsoleCommand> {
    match command {
        Command::Serve { port, host } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            None
        }
        Command::Discover { issuer } => {
            if let Some(issuer) = issuer {
                config.client.issuer = issuer;
            }
            Some(ConsoleCommand::Discover)
        }
        Command::Token => Some(ConsoleCommand::Token),
        Command::Call { api_base_url } => {
            if let Some(url) = api_base_url {
                config.client.api_base_url = url;
            }
            Some(ConsoleCommand::Call)
        }
    }
}

/// Run the protected API
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting rewards API"
    );

    if let Err(e) = server::run(config).await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Run a console client command
async fn run_console(command: ConsoleCommand, config: &Config) -> ExitCode {
    let console = match Console::new(config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut out = std::io::stdout();
    let result = match command {
        ConsoleCommand::Discover => console.discover(&mut out).await,
        ConsoleCommand::Token => console.token(&mut out).await.map(|_| ()),
        ConsoleCommand::Call => console.call(&mut out).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

use crate::config::Config;
use crate::server::ServerConfig;
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

mod agent;
mod cli;
mod config;
mod data;
mod db;
mod diagnostics;
mod engine;
mod error;
mod logs;
mod management;
mod repl;
mod rest;
mod server;
mod session;
mod tools;
mod utils;

#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::error!("Failed to install default crypto provider");
    }
    // Load a local .env file when present
    dotenvy::dotenv().ok();
    // Parse command line arguments
    let cli = cli::Cli::parse();
    let config = Arc::new(Config::from(cli.settings));
    // Logs go to stderr unless the HTTP server owns the process
    let http = matches!(
        &cli.command,
        cli::Commands::Start {
            bind_address: Some(_),
            ..
        }
    );
    logs::init_logging_and_metrics(!http);
    // Fail early when the command needs the management API token
    if cli.command.requires_access_token(&config) {
        config.access_token()?;
    }
    // Run the specified command
    match cli.command {
        cli::Commands::Start {
            bind_address,
            rate_limit_rps,
            rate_limit_burst,
        } => {
            // Create the server config
            let server = ServerConfig {
                bind_address,
                rate_limit_rps,
                rate_limit_burst,
            };
            server::start_server(server, config).await
        }
        cli::Commands::Chat { max_turns } => {
            let management = Arc::new(management::Client::new(
                config.api_url.clone(),
                config.access_token()?,
            ));
            let service = tools::SupabaseService::new(
                utils::generate_connection_id(),
                management,
                config.clone(),
            );
            let chat = agent::ChatClient::new(&config.llm);
            let agent = agent::Agent::new(chat, service, tools::INSTRUCTIONS, max_turns);
            repl::run(&agent).await?;
            Ok(())
        }
        cli::Commands::Lifecycle { project_name } => {
            diagnostics::run_lifecycle(config, &project_name).await
        }
        cli::Commands::Probe {
            project_ref,
            attempts,
            delay_secs,
            jitter,
        } => {
            let options = diagnostics::ProbeOptions {
                project_ref,
                retry: utils::RetryPolicy::new(attempts, Duration::from_secs(delay_secs))
                    .with_jitter(jitter),
            };
            diagnostics::run_probe(config, options).await
        }
    }
}

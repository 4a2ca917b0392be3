//! gmail-mcp-rs: Gmail MCP server over stdio
//!
//! This server lets an MCP client send mail and read inbox, sent, and draft
//! messages of one Gmail account. It owns the OAuth2 token lifecycle, encodes
//! outbound MIME messages, and normalizes provider payloads into a uniform
//! message record.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading, wiring, and stdio serving
//! - [`cli`]: Command-line surface (`serve`, setup helpers)
//! - [`config`]: Environment-driven configuration for paths and endpoints
//! - [`errors`]: Application error model with MCP error mapping
//! - [`credentials`]: Client-secret descriptor and persisted token files
//! - [`auth`]: OAuth2 token lifecycle with single-flight refresh
//! - [`gmail`]: Gmail REST transport and wire payloads with timeout wrappers
//! - [`compose`]: Outbound RFC 2822 message encoding
//! - [`mime`]: Message decoding, header lookup, and part-tree walks
//! - [`mailbox`]: Mailbox operations façade
//! - [`server`]: MCP tool handlers with validation
//! - [`models`]: Input/output DTOs and schema-bearing types

mod auth;
mod cli;
mod compose;
mod config;
mod credentials;
mod errors;
mod gmail;
mod mailbox;
mod mime;
mod models;
mod server;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use auth::{HttpTokenEndpoint, TokenManager};
use cli::{Cli, Command};
use config::ServerConfig;
use credentials::{Credentials, TokenStore};
use gmail::HttpMailStore;
use mailbox::Mailbox;

/// Application entry point
///
/// Initializes tracing from environment, loads config and credentials, and
/// runs the selected command. `serve` expects to be spawned by an MCP client
/// via `stdio` transport; logs always go to stderr.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// GMAIL_MCP_CREDENTIALS_PATH=./credentials.json \
/// GMAIL_MCP_TOKEN_PATH=./token.json \
/// cargo run -- serve
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load_from_env()?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.http_timeout_ms))
        .build()?;

    let credentials = Credentials::load(&config.credentials_path).await?;
    let tokens = Arc::new(TokenManager::new(
        credentials,
        TokenStore::new(config.token_path.clone()),
        Arc::new(HttpTokenEndpoint::new(client.clone(), &config)),
        config.auth_url.clone(),
    ));

    match cli.command() {
        Command::Serve => serve(config, client, tokens).await?,
        Command::AuthUrl => cli::print_auth_url(&tokens),
        Command::ExchangeCode { code } => cli::exchange_code(&tokens, &code).await?,
        Command::Refresh => cli::refresh(&tokens).await?,
        Command::Status => cli::status(&tokens).await?,
    }
    Ok(())
}

/// Wire the façade and serve MCP over stdio until the client disconnects
async fn serve(
    config: ServerConfig,
    client: reqwest::Client,
    tokens: Arc<TokenManager>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = tokens.bootstrap(config.auth_code.as_ref()).await {
        error!(error = %e, "startup authorization failed; tools will report it until resolved");
    }

    let store = Arc::new(HttpMailStore::new(client, &config));
    let mailbox = Arc::new(Mailbox::new(tokens, store, config.fetch_concurrency));
    let service = server::GmailServer::new(mailbox).serve(stdio()).await?;
    info!("serving MCP over stdio");

    tokio::select! {
        result = service.waiting() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; shutting down");
        }
    }
    Ok(())
}

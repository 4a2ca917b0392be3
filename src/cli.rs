//! Command-line surface
//!
//! `serve` (the default) runs the MCP server over stdio. The other commands
//! are one-shot setup helpers that print to stdout and exit.

use clap::{Parser, Subcommand};

use crate::auth::{AuthStatus, Scope, TokenManager};
use crate::errors::AppResult;

/// Gmail MCP server
#[derive(Debug, Parser)]
#[command(name = "gmail-mcp-rs", version, about = "Gmail MCP server over stdio")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Selected command, defaulting to `serve`
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Serve MCP tools over stdio
    Serve,
    /// Print the consent URL to visit for a new authorization code
    AuthUrl,
    /// Exchange an authorization code and save the resulting token
    ExchangeCode {
        /// Code shown on the consent page
        code: String,
    },
    /// Refresh the saved token now
    Refresh,
    /// Show token state and granted scopes
    Status,
}

/// Print the consent URL with next steps
pub fn print_auth_url(tokens: &TokenManager) {
    println!("Open this URL in a browser and approve access:\n");
    println!("{}\n", tokens.build_authorization_url(&Scope::ALL));
    println!("Then run: gmail-mcp-rs exchange-code <code>");
}

/// Exchange `code` and report what was granted
///
/// # Errors
///
/// Any [`TokenManager::exchange_code`] error.
pub async fn exchange_code(tokens: &TokenManager, code: &str) -> AppResult<()> {
    let token = tokens.exchange_code(code).await?;
    println!("Authorization complete; token saved.");
    for scope in &token.scopes {
        println!("  granted: {scope}");
    }
    Ok(())
}

/// Force a refresh and report the new expiry
///
/// # Errors
///
/// Any [`TokenManager::refresh`] error.
pub async fn refresh(tokens: &TokenManager) -> AppResult<()> {
    let token = tokens.refresh().await?;
    match token.expires_at {
        Some(at) => println!("Token refreshed; expires at {}", at.to_rfc3339()),
        None => println!("Token refreshed"),
    }
    Ok(())
}

/// Print token state
///
/// # Errors
///
/// `Internal` if the token file exists but cannot be read.
pub async fn status(tokens: &TokenManager) -> AppResult<()> {
    let status = tokens.status().await?;
    for line in status_lines(&status) {
        println!("{line}");
    }
    Ok(())
}

fn status_lines(status: &AuthStatus) -> Vec<String> {
    if !status.token_present {
        return vec![
            "token: missing".to_owned(),
            "run `gmail-mcp-rs auth-url` to authorize".to_owned(),
        ];
    }

    let mut lines = vec![
        format!(
            "token: present ({})",
            if status.stale { "expired" } else { "valid" }
        ),
        format!(
            "refreshable: {}",
            if status.refreshable { "yes" } else { "no" }
        ),
        format!(
            "expires at: {}",
            status.expires_at.as_deref().unwrap_or("unknown")
        ),
    ];
    lines.extend(status.granted.iter().map(|url| format!("  [granted] {url}")));
    lines.extend(
        status
            .missing
            .iter()
            .map(|scope| format!("  [missing] {} ({})", scope.url(), scope.description())),
    );
    if !status.missing.is_empty() {
        lines.push(
            "delete the token file and run `gmail-mcp-rs auth-url` to grant missing scopes"
                .to_owned(),
        );
    }
    lines
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command, status_lines};
    use crate::auth::{AuthStatus, Scope};

    #[test]
    fn defaults_to_serve() {
        let cli = Cli::try_parse_from(["gmail-mcp-rs"]).expect("parse");
        assert_eq!(cli.command(), Command::Serve);
    }

    #[test]
    fn parses_exchange_code() {
        let cli = Cli::try_parse_from(["gmail-mcp-rs", "exchange-code", "4/abc"]).expect("parse");
        assert_eq!(
            cli.command(),
            Command::ExchangeCode {
                code: "4/abc".to_owned()
            }
        );
        assert!(Cli::try_parse_from(["gmail-mcp-rs", "exchange-code"]).is_err());
    }

    #[test]
    fn status_lines_flag_missing_scopes() {
        let status = AuthStatus {
            token_present: true,
            stale: true,
            refreshable: true,
            expires_at: Some("2025-01-01T00:00:00+00:00".to_owned()),
            granted: vec![Scope::Send.url().to_owned()],
            missing: vec![Scope::ReadOnly, Scope::Modify],
        };
        let lines = status_lines(&status);
        assert_eq!(lines[0], "token: present (expired)");
        assert!(lines.iter().any(|l| l.contains("[granted]") && l.contains("gmail.send")));
        assert!(lines.iter().any(|l| l.contains("[missing]") && l.contains("gmail.readonly")));
        assert!(lines.last().is_some_and(|l| l.starts_with("delete the token file")));
    }
}

//! Command-line interface parsing for html5-cf
//!
//! This module handles parsing of CLI arguments using clap and validation of
//! the values clap cannot check on its own, such as the runtime name used in
//! conventional application URLs.

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::context::DestinationLevel;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// The runtime cannot be used as a host name label
    #[error("Invalid runtime: '{0}'. Runtime must contain only letters, digits and '-'")]
    InvalidRuntime(String),
}

/// List HTML5 applications and destinations of the targeted Cloud Foundry space
#[derive(Parser, Debug)]
#[command(name = "html5-cf")]
#[command(about = "HTML5 applications and destinations of Cloud Foundry spaces")]
#[command(version)]
pub struct Cli {
    /// Keep resolved services and tokens in a cache file for one hour
    ///
    /// Same as setting HTML5_CACHE=1. Service instances and keys created for
    /// the lookup are kept while cached.
    #[arg(long, global = true)]
    pub cache: bool,

    /// Print trace logs to stderr (same as CF_TRACE=true)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Display HTML5 applications of the html5-apps-repo app-runtime plan
    List(ListArgs),

    /// Display on-premise applications exposed through destinations
    Destinations(DestinationsArgs),
}

#[derive(clap::Args, Debug, Clone, PartialEq, Eq, Default)]
pub struct ListArgs {
    /// Cloud Foundry application bound to the html5-apps-repo app-runtime plan
    ///
    /// Its binding is used instead of creating or reusing an instance in the space.
    #[arg(short, long, value_name = "CF_APP_NAME")]
    pub app: Option<String>,

    /// Show conventional URLs of applications
    #[arg(short, long)]
    pub url: bool,

    /// Runtime for which conventional URLs are shown (default: cpp)
    ///
    /// Examples:
    ///   html5-cf list --url                      # https://<zone>.cpp.<domain>/...
    ///   html5-cf list --url --runtime launchpad  # https://<zone>.launchpad.<domain>/...
    #[arg(short, long, value_name = "RUNTIME", requires = "url")]
    pub runtime: Option<String>,
}

#[derive(clap::Args, Debug, Clone, PartialEq, Eq, Default)]
pub struct DestinationsArgs {
    /// List subaccount destinations instead of service instance destinations
    #[arg(short, long)]
    pub subaccount: bool,
}

/// Validated options of the `list` command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub app: Option<String>,
    pub show_url: bool,
    pub runtime: Option<String>,
}

/// Checks that a runtime can be used as a host name label.
///
/// # Returns
/// * `Ok(String)` with the runtime in lower case
/// * `Err(CliError::InvalidRuntime)` otherwise
pub fn parse_runtime_arg(s: &str) -> Result<String, CliError> {
    let valid = !s.is_empty()
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(s.to_ascii_lowercase())
    } else {
        Err(CliError::InvalidRuntime(s.to_string()))
    }
}

impl ListOptions {
    pub fn from_args(args: &ListArgs) -> Result<Self, CliError> {
        let runtime = args.runtime.as_deref().map(parse_runtime_arg).transpose()?;
        Ok(ListOptions {
            app: args.app.clone(),
            show_url: args.url,
            runtime,
        })
    }
}

impl DestinationsArgs {
    pub fn level(&self) -> DestinationLevel {
        if self.subaccount {
            DestinationLevel::Subaccount
        } else {
            DestinationLevel::Instance
        }
    }
}

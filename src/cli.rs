//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// MCP Warden - security policy enforcement for MCP servers
#[derive(Parser, Debug)]
#[command(name = "mcp-warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_WARDEN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MCP_WARDEN_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_WARDEN_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate the configuration: default policy and every server override
    Validate,

    /// Scan text for hidden-instruction indicators
    ///
    /// The operator-facing probe for vetting tool descriptions before
    /// onboarding a server. Exits nonzero when indicators are found.
    Scan {
        /// Literal text to scan
        #[arg(long, required_unless_present = "file", conflicts_with = "file")]
        text: Option<String>,

        /// File whose contents to scan
        #[arg(long)]
        file: Option<PathBuf>,

        /// Additional detection regex, repeatable (compiled case-insensitive)
        #[arg(short, long = "pattern")]
        patterns: Vec<String>,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

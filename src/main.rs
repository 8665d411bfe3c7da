//! MCP Warden - security policy enforcement for MCP servers
//!
//! Operator CLI: validate deployment configuration and probe text for
//! hidden-instruction indicators.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;

use mcp_warden::{
    cli::{Cli, Command},
    config::WardenConfig,
    scanner::ContentScanner,
    setup_tracing,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Command::Validate => run_validate(cli.config.as_deref()),
        Command::Scan {
            text,
            file,
            patterns,
            format,
        } => run_scan(text, file.as_deref(), &patterns, &format),
    }
}

/// Validate the configuration file and every policy in it
fn run_validate(path: Option<&Path>) -> ExitCode {
    match WardenConfig::load(path) {
        Ok(config) => {
            println!(
                "✅ Configuration valid: default policy and {} server override(s)",
                config.servers.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Invalid configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Scan text (or a file) for hidden-instruction indicators
fn run_scan(
    text: Option<String>,
    file: Option<&Path>,
    patterns: &[String],
    format: &str,
) -> ExitCode {
    let content = match (text, file) {
        (Some(t), _) => t,
        (None, Some(p)) => match std::fs::read_to_string(p) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to read {}: {e}", p.display());
                return ExitCode::FAILURE;
            }
        },
        (None, None) => {
            eprintln!("❌ Provide --text or --file");
            return ExitCode::FAILURE;
        }
    };

    let scanner = match ContentScanner::new(patterns) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let findings = scanner.detect(&content);

    if format == "json" {
        match serde_json::to_string_pretty(&findings) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("❌ Failed to serialize findings: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else if findings.is_empty() {
        println!("✅ No hidden-instruction indicators found");
    } else {
        println!("Found {} indicator(s):\n", findings.len());
        for finding in &findings {
            println!("  ⚠️  {}", finding.reason());
        }
        println!("\n💡 Tip: use --format json for machine-readable output");
    }

    if findings.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

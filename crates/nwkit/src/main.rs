//! nwkit command line driver
//!
//! Connects to the configured lab device and prints its facts, or runs a
//! command on the configured jump host.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nwkit::config::DEFAULT_CONFIG_PATH;
use nwkit::{NwError, NwUtilities};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "nwkit", version, about = "Network automation helpers")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Connect to [lab_device] and print its facts
    Facts,
    /// Run a command on [jumphost]
    JumpExec {
        /// Command to run
        #[arg(default_value = "pwd")]
        command: String,
    },
}

async fn facts(nw: &mut NwUtilities, json: bool) -> Result<()> {
    let target = nw
        .settings()
        .device
        .clone()
        .ok_or_else(|| NwError::InvalidArgument("[lab_device] host_ip is not configured".to_string()))?;

    if !json {
        println!("Connect to {} -- {}", target.host, target.username);
    }
    let device = nw.open_device(&target).await.context("opening device session")?;

    let facts = device.facts();
    if json {
        println!("{}", serde_json::to_string_pretty(&facts)?);
    } else {
        println!("{:#?}", facts);
    }

    nw.close_device().await;
    if !json {
        println!("Disconnected from {}", device.hostname());
    }
    Ok(())
}

async fn jump_exec(nw: &mut NwUtilities, command: &str, json: bool) -> Result<()> {
    let target = nw
        .settings()
        .jumphost
        .clone()
        .ok_or_else(|| NwError::InvalidArgument("[jumphost] jump is not configured".to_string()))?;

    let client = nw.connect_jumphost(&target).await.context("connecting to jump host")?;
    let output = client.exec(command).await.map_err(NwError::from)?;

    if json {
        let value = serde_json::json!({
            "host": target.host,
            "command": command,
            "exit_status": output.exit_status,
            "stdout": output.stdout,
            "stderr": output.stderr,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", output.stdout.trim());
        if !output.stderr.trim().is_empty() {
            eprintln!("{}", output.stderr.trim());
        }
    }

    if !output.success() {
        anyhow::bail!("'{}' exited with status {}", command, output.exit_status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    nwkit::logging::init();

    let cli = Cli::parse();
    let json = cli.json;
    let command = cli.command.unwrap_or(Command::Facts);

    let mut nw = NwUtilities::builder()
        .with_config_path(&cli.config)
        .build()
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let (result, report) = nw
        .scoped(move |nw| {
            Box::pin(async move {
                match command {
                    Command::Facts => facts(nw, json).await,
                    Command::JumpExec { command } => jump_exec(nw, &command, json).await,
                }
            })
        })
        .await;

    if !report.is_clean() {
        for (step, reason) in report.failures() {
            error!("Teardown of {} failed: {}", step, reason);
        }
    }

    if let Err(e) = &result {
        error!("nwkit failed: {:#}", e);
    } else {
        info!("Done");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_facts() {
        let cli = Cli::try_parse_from(["nwkit"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.json);
        assert_eq!(cli.config, PathBuf::from("./_config.ini"));
    }

    #[test]
    fn test_cli_jump_exec() {
        let cli = Cli::try_parse_from(["nwkit", "--config", "/etc/nwkit.ini", "jump-exec", "uname -a", "--json"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/nwkit.ini"));
        assert!(cli.json);
        match cli.command {
            Some(Command::JumpExec { command }) => assert_eq!(command, "uname -a"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_cli_jump_exec_default_command() {
        let cli = Cli::try_parse_from(["nwkit", "jump-exec"]).unwrap();
        assert!(matches!(cli.command, Some(Command::JumpExec { command }) if command == "pwd"));
    }
}

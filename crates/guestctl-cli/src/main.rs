//! guestctl - drive a remote desktop session over SSH
//!
//! Usage:
//!   guestctl call '<operation json>'   Dispatch one operation
//!   guestctl script <file>             Dispatch a JSON array of operations
//!   guestctl workspaces                List workspaces (no connection)
//!   guestctl check-config              Validate and print configuration
//!
//! Results go to stdout as JSON; diagnostics go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guestctl_core::GuestConfig;
use guestctl_remote::OpenSshTransport;
use guestctl_session::{Operation, OperationOutput, Session};
use guestctl_workspace::WorkspaceRegistry;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "guestctl")]
#[command(author, version, about = "Drive a remote desktop session over SSH")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML configuration file; environment variables override it
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch a single operation given as JSON
    Call {
        /// Operation, e.g. '{"op": "remote.execute", "command": "uname -a"}'
        operation: String,

        /// Write resolved artifact bytes to this file
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// Dispatch a JSON array of operations over one connection
    Script {
        /// File holding the operations
        file: PathBuf,

        /// Continue after a failed operation
        #[arg(long)]
        keep_going: bool,
    },

    /// List workspaces without connecting
    Workspaces,

    /// Load and validate configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries results
    let filter = if cli.verbose {
        EnvFilter::new(Level::DEBUG.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.as_str()))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Call { operation, out } => cmd_call(config_path, &operation, out).await,
        Commands::Script { file, keep_going } => cmd_script(config_path, &file, keep_going).await,
        Commands::Workspaces => cmd_workspaces(config_path).await,
        Commands::CheckConfig => cmd_check_config(config_path),
    }
}

fn load_config(path: Option<&Path>) -> Result<GuestConfig> {
    GuestConfig::load(path).context("Invalid configuration")
}

async fn connect(path: Option<&Path>) -> Result<Session<OpenSshTransport>> {
    let config = load_config(path)?;
    let target = format!("{}:{}", config.connection.target(), config.connection.port);
    Session::connect(config)
        .await
        .with_context(|| format!("Failed to connect to {}", target))
}

async fn close(session: &Session<OpenSshTransport>) {
    if let Err(e) = session.shutdown().await {
        warn!("Shutdown failed: {}", e);
    }
}

/// Response envelope printed for each dispatched operation
fn response(name: &str, result: &guestctl_core::Result<OperationOutput>) -> Value {
    match result {
        Ok(output) => json!({ "op": name, "ok": true, "output": output }),
        Err(e) => json!({
            "op": name,
            "ok": false,
            "error": { "kind": e.kind(), "message": e.to_string() },
        }),
    }
}

fn parse_operation(value: Value) -> Result<Operation> {
    serde_json::from_value(value).context("Malformed operation")
}

async fn cmd_call(config: Option<&Path>, operation: &str, out: Option<PathBuf>) -> Result<ExitCode> {
    let value: Value = serde_json::from_str(operation).context("Operation is not valid JSON")?;
    let op = parse_operation(value)?;

    let session = connect(config).await?;
    let name = op.name();
    let result = session.dispatch(op).await;
    close(&session).await;

    if let Ok(OperationOutput::Bytes { id, data, .. }) = &result {
        match &out {
            Some(path) => {
                tokio::fs::write(path, data)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Wrote {} ({} bytes) to {}", id, data.len(), path.display());
            }
            None => warn!("Artifact bytes not written; pass --out FILE to save them"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&response(name, &result))?);
    Ok(if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_script(config: Option<&Path>, file: &Path, keep_going: bool) -> Result<ExitCode> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let values: Vec<Value> = serde_json::from_str(&content)
        .with_context(|| format!("{} must hold a JSON array of operations", file.display()))?;
    // Reject the whole script before connecting if any entry is malformed
    let ops = values
        .into_iter()
        .enumerate()
        .map(|(i, v)| parse_operation(v).with_context(|| format!("Operation {} in {}", i, file.display())))
        .collect::<Result<Vec<_>>>()?;

    let session = connect(config).await?;
    let total = ops.len();
    let mut failed = 0;
    for (i, op) in ops.into_iter().enumerate() {
        let name = op.name();
        let result = session.dispatch(op).await;
        println!("{}", serde_json::to_string(&response(name, &result))?);
        if result.is_err() {
            failed += 1;
            if !keep_going {
                warn!("Stopped at operation {} of {} ({})", i, total, name);
                break;
            }
        }
    }
    close(&session).await;

    if failed > 0 {
        warn!("{} operation(s) failed", failed);
        return Ok(ExitCode::FAILURE);
    }
    info!("Completed {} operation(s)", total);
    Ok(ExitCode::SUCCESS)
}

async fn cmd_workspaces(config: Option<&Path>) -> Result<ExitCode> {
    // Listing needs only the storage root, so connection settings are not validated
    let mut config = match config {
        Some(path) => GuestConfig::from_file(path).context("Invalid configuration")?,
        None => GuestConfig::default(),
    };
    config.apply_env();

    let registry = WorkspaceRegistry::new(config.workspaces.root.clone());
    let workspaces = registry
        .list()
        .await
        .with_context(|| format!("Failed to list {}", config.workspaces.root.display()))?;
    println!("{}", serde_json::to_string_pretty(&workspaces)?);
    Ok(ExitCode::SUCCESS)
}

fn cmd_check_config(config: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use guestctl_core::GuestError;

    #[test]
    fn test_cli_parses_call() {
        let cli = Cli::try_parse_from([
            "guestctl",
            "--verbose",
            "call",
            r#"{"op": "artifact.resolve", "id": "x"}"#,
            "--out",
            "shot.png",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Call { operation, out } => {
                assert!(operation.contains("artifact.resolve"));
                assert_eq!(out, Some(PathBuf::from("shot.png")));
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn test_cli_parses_script_flags() {
        let cli =
            Cli::try_parse_from(["guestctl", "script", "ops.json", "--keep-going", "-c", "vm.toml"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("vm.toml")));
        assert!(matches!(
            cli.command,
            Commands::Script { keep_going: true, .. }
        ));
    }

    #[test]
    fn test_response_envelope() {
        let ok: guestctl_core::Result<OperationOutput> = Ok(OperationOutput::Ack {
            message: "click left x1".into(),
        });
        let value = response("ui.click", &ok);
        assert_eq!(value["ok"], true);
        assert_eq!(value["output"]["kind"], "ack");

        let err: guestctl_core::Result<OperationOutput> = Err(GuestError::NoActiveWorkspace);
        let value = response("workspace.info", &err);
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["kind"], "no_active_workspace");
    }

    #[test]
    fn test_parse_operation_rejects_unknown() {
        assert!(parse_operation(json!({"op": "remote.reboot"})).is_err());
        assert!(parse_operation(json!({"op": "workspace.list"})).is_ok());
    }
}

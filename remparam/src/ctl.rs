//! remparamctl - Remote parameter control utility

mod config;
mod kind;

use crate::config::{RemparamConfig, DEFAULT_CONFIG_PATH};
use crate::kind::ValueKind;
use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use libremparam::{Namespace, ParameterProxy};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

/// Remote parameter control utility
#[derive(Parser)]
#[command(name = "remparamctl", version, about = "Query and update remote parameters")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file declaring the parameters
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Socket directory (overrides the configuration)
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Transaction timeout in milliseconds (overrides the configuration)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a parameter
    Get {
        name: String,

        /// Value kind, for parameters missing from the configuration
        #[arg(short, long)]
        kind: Option<ValueKind>,

        /// String capacity in bytes
        #[arg(long)]
        capacity: Option<usize>,
    },

    /// Write a parameter
    Set {
        name: String,

        value: String,

        /// Value kind, for parameters missing from the configuration
        #[arg(short, long)]
        kind: Option<ValueKind>,

        /// String capacity in bytes
        #[arg(long)]
        capacity: Option<usize>,
    },

    /// Show every configured parameter with its current value
    List,
}

/// Resolved target of a get or set
struct Target {
    proxy: ParameterProxy,
    kind: ValueKind,
    size: usize,
}

struct Ctl {
    config: RemparamConfig,
    namespace: Namespace,
    timeout: Duration,
}

impl Ctl {
    fn target(&self, name: &str, kind: Option<ValueKind>, capacity: Option<usize>) -> Result<Target> {
        let declared = self.config.find(name);
        let kind = kind
            .or(declared.map(|p| p.kind))
            .ok_or_else(|| anyhow!("Unknown parameter {}: pass --kind", name))?;
        let capacity = capacity.or(declared.and_then(|p| p.capacity));
        let size = kind.size(capacity)?;

        Ok(Target {
            proxy: ParameterProxy::new(name)
                .with_namespace(self.namespace.clone())
                .with_timeout(self.timeout),
            kind,
            size,
        })
    }

    fn get(&self, target: &Target) -> Result<String> {
        let mut buf = vec![0u8; target.size];
        let received = target.proxy.get(&mut buf)?;
        if received != target.size {
            bail!(
                "Parameter {} is {} bytes, expected {} for {}",
                target.proxy.name(),
                received,
                target.size,
                target.kind
            );
        }
        Ok(target.kind.decode(&buf)?)
    }

    fn set(&self, target: &Target, value: &str) -> Result<()> {
        let bytes = target.kind.encode(value, target.size)?;
        target.proxy.set(&bytes)?;
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = RemparamConfig::load(&cli.config)?;
    let namespace = match &cli.socket_dir {
        Some(dir) => Namespace::Directory(dir.clone()),
        None => config.namespace(),
    };
    let timeout = cli
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.timeout());
    let ctl = Ctl {
        config,
        namespace,
        timeout,
    };

    match cli.command {
        Commands::Get {
            name,
            kind,
            capacity,
        } => {
            let target = ctl.target(&name, kind, capacity)?;
            let value = ctl.get(&target)?;
            if cli.json {
                println!(
                    "{}",
                    json!({ "name": name, "kind": target.kind.to_string(), "value": value })
                );
            } else {
                println!("{}", value);
            }
        }

        Commands::Set {
            name,
            value,
            kind,
            capacity,
        } => {
            let target = ctl.target(&name, kind, capacity)?;
            ctl.set(&target, &value)?;
            if cli.json {
                println!(
                    "{}",
                    json!({ "name": name, "kind": target.kind.to_string(), "value": value })
                );
            } else {
                println!("{} = {}", name, value);
            }
        }

        Commands::List => {
            let mut entries = Vec::new();
            for declared in &ctl.config.parameters {
                let value = ctl
                    .target(&declared.name, None, None)
                    .and_then(|target| ctl.get(&target));

                if cli.json {
                    let (value, error) = match value {
                        Ok(value) => (Some(value), None),
                        Err(e) => (None, Some(e.to_string())),
                    };
                    entries.push(json!({
                        "name": declared.name,
                        "kind": declared.kind.to_string(),
                        "read_only": declared.read_only,
                        "property": declared.property,
                        "value": value,
                        "error": error,
                    }));
                } else {
                    let value = value.unwrap_or_else(|e| format!("<{}>", e));
                    let flags = if declared.read_only { " (read-only)" } else { "" };
                    println!(
                        "{:<24} {:<8} {}{}",
                        declared.name,
                        declared.kind.to_string(),
                        value,
                        flags
                    );
                }
            }

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if ctl.config.parameters.is_empty() {
                println!("No parameters configured in {:?}", cli.config);
            }
        }
    }

    Ok(())
}

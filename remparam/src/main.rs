//! Remparam - Remote parameter daemon
//!
//! Provides:
//! - Typed parameters declared in a TOML file, one socket each
//! - Values persisted to a property file across restarts
//! - Peer credential checks on every connection

mod config;
mod kind;
mod parameter;

use crate::config::{RemparamConfig, DEFAULT_CONFIG_PATH};
use crate::parameter::ConfiguredParameter;
use anyhow::{Context, Result};
use clap::Parser;
use libprop::{FileStore, PropertyStore};
use libremparam::ParameterServer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Remparam - Remote parameter daemon
#[derive(Parser, Debug)]
#[command(name = "remparamd", version, about)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Register every configured parameter
fn build_server(config: &RemparamConfig, store: Arc<dyn PropertyStore>) -> Result<ParameterServer> {
    let mut server = ParameterServer::new(config.server_config())?;

    for declared in &config.parameters {
        let parameter = ConfiguredParameter::new(declared, Arc::clone(&store))?;
        debug!("Parameter {} = {}", declared.name, parameter.text());
        server
            .add_parameter(parameter)
            .with_context(|| format!("Failed to register parameter {}", declared.name))?;
    }

    Ok(server)
}

/// Block until SIGINT or SIGTERM
async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = RemparamConfig::load(&args.config)?;

    // Initialize logging
    let log_level = if args.debug {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    info!("Remparam v{} starting", VERSION);
    info!("Configuration loaded from {:?}", args.config);
    config.validate()?;

    // Property store backing persistent parameters
    let store: Arc<dyn PropertyStore> = Arc::new(FileStore::open(&config.daemon.property_file)?);

    let mut server = build_server(&config, store)?;
    server.start()?;
    info!(
        "Remparam ready: {} parameters on {:?}",
        server.parameter_names().len(),
        server.namespace()
    );

    wait_for_shutdown().await?;

    server.stop();
    info!("Remparam stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libprop::MemoryStore;
    use libremparam::{Namespace, ParameterProxy};
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path, parameters: &str) -> RemparamConfig {
        let text = format!(
            "[daemon]\nsocket_dir = {:?}\ntimeout_ms = 1000\n{}",
            dir.display().to_string(),
            parameters
        );
        toml::from_str(&text).unwrap()
    }

    #[test]
    fn test_daemon_serves_and_persists() {
        let dir = tempdir().unwrap();
        let config = config_in(
            dir.path(),
            r#"
            [[parameter]]
            name = "volume"
            kind = "u32"
            default = "30"
            property = "audio.volume"

            [[parameter]]
            name = "firmware"
            kind = "string"
            capacity = 8
            default = "1.0"
            read_only = true
            "#,
        );
        config.validate().unwrap();

        let store: Arc<dyn PropertyStore> = Arc::new(MemoryStore::new());
        let mut server = build_server(&config, Arc::clone(&store)).unwrap();
        server.start().unwrap();

        let namespace = Namespace::Directory(dir.path().to_path_buf());
        let volume = ParameterProxy::new("volume").with_namespace(namespace.clone());
        let mut buf = [0u8; 4];
        assert_eq!(volume.get(&mut buf).unwrap(), 4);
        assert_eq!(u32::from_ne_bytes(buf), 30);

        volume.set(&55u32.to_ne_bytes()).unwrap();
        assert_eq!(store.get("audio.volume").as_deref(), Some("55"));

        let firmware = ParameterProxy::new("firmware").with_namespace(namespace);
        assert!(firmware.set(b"2.0\0\0\0\0\0").is_err());
        let mut buf = [0u8; 8];
        firmware.get(&mut buf).unwrap();
        assert_eq!(&buf, b"1.0\0\0\0\0\0");

        server.stop();
    }
}

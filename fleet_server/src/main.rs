//! Process entry point for the fleet-protocol bridge server: CLI parsing,
//! config file loading, TLS flag validation, logging initialization, and
//! the supervisor's run/shutdown lifecycle.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use fleet_core::{ServerConfig, Supervisor, TlsSettings};

/// Fleet-protocol bridge server.
#[derive(Parser)]
#[command(version, about = "Bridges the cloud backend and vehicles over MQTT")]
struct Cli {
    /// Path to the server's TOML configuration file.
    config_path: PathBuf,
    /// Connect to the broker over TLS.
    #[arg(long, default_value_t = false)]
    tls: bool,
    /// CA certificate bundle, required when `--tls` is set.
    #[arg(long)]
    ca: Option<String>,
    /// Client certificate, for mutual TLS.
    #[arg(long)]
    cert: Option<String>,
    /// Client private key, for mutual TLS.
    #[arg(long)]
    key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("--tls requires --ca, --cert and --key")]
    IncompleteTls,
    #[error("failed to read config file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn load_config(path: &PathBuf) -> Result<ServerConfig, StartupError> {
    let text = fs::read_to_string(path).map_err(|source| StartupError::ReadConfig {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| StartupError::ParseConfig {
        path: path.clone(),
        source,
    })
}

fn tls_settings(cli: &Cli) -> Result<Option<TlsSettings>, StartupError> {
    if !cli.tls {
        return Ok(None);
    }
    let (Some(ca), Some(cert), Some(key)) = (&cli.ca, &cli.cert, &cli.key) else {
        return Err(StartupError::IncompleteTls);
    };
    Ok(Some(TlsSettings {
        ca_file: ca.clone(),
        cert_file: Some(cert.clone()),
        key_file: Some(key.clone()),
    }))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("rumqttc", log::LevelFilter::Warn)
        .format_timestamp(None)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(
            e.kind(),
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
        ) =>
        {
            e.exit()
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let tls = match tls_settings(&cli) {
        Ok(tls) => tls,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };
    let config = match load_config(&cli.config_path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    let mut supervisor = Supervisor::new(config, tls);
    if let Err(e) = supervisor.start().await {
        log::error!("failed to start fleet: {e}");
        std::process::exit(1);
    }

    log::info!("fleet bridge running for cars: {:?}", supervisor.running_cars());

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("failed to listen for ctrl-c: {e}");
    }
    log::info!("shutting down");
    supervisor.stop().await;
}

use std::path::PathBuf;

use clap::Parser;
use puente_delivery::{DEFAULT_REQUEUE_INTERVAL_SECONDS, DEFAULT_SPOOL_DIR};
use puente_session::{DEFAULT_SESSION_DIR, DEFAULT_SIDECAR_URL};

pub(crate) const DEFAULT_SERVER_URL: &str = "http://172.16.12.199:8523";
pub(crate) const DEFAULT_API_TOKEN: &str = "cambiar-en-produccion";
pub(crate) const DEFAULT_LOCAL_PORT: u16 = 9000;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "puente",
    about = "Relays a WhatsApp session to an HTTP webhook and back",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long = "server-url",
        env = "SERVER_URL",
        default_value = DEFAULT_SERVER_URL,
        help = "Base URL of the server that receives POST /webhook"
    )]
    pub(crate) server_url: String,

    #[arg(
        long = "api-token",
        env = "API_TOKEN",
        default_value = DEFAULT_API_TOKEN,
        hide_env_values = true,
        help = "Bearer token for outbound webhooks and the local send endpoint"
    )]
    pub(crate) api_token: String,

    #[arg(
        long = "port",
        env = "PUERTO_LOCAL",
        default_value_t = DEFAULT_LOCAL_PORT,
        help = "Port of the local HTTP API"
    )]
    pub(crate) port: u16,

    #[arg(
        long = "spool-dir",
        env = "PUENTE_SPOOL_DIR",
        default_value = DEFAULT_SPOOL_DIR,
        help = "Directory holding undelivered webhook payloads"
    )]
    pub(crate) spool_dir: PathBuf,

    #[arg(
        long = "session-dir",
        env = "PUENTE_SESSION_DIR",
        default_value = DEFAULT_SESSION_DIR,
        help = "Directory holding the WhatsApp session credentials"
    )]
    pub(crate) session_dir: PathBuf,

    #[arg(
        long = "sidecar-url",
        env = "PUENTE_SIDECAR_URL",
        default_value = DEFAULT_SIDECAR_URL,
        help = "WebSocket URL of the WhatsApp session sidecar"
    )]
    pub(crate) sidecar_url: String,

    #[arg(
        long = "requeue-interval-seconds",
        env = "PUENTE_REQUEUE_INTERVAL_SECONDS",
        default_value_t = DEFAULT_REQUEUE_INTERVAL_SECONDS,
        value_parser = parse_positive_u64,
        help = "Seconds between sweeps of the spillover directory"
    )]
    pub(crate) requeue_interval_seconds: u64,
}

impl Cli {
    pub(crate) fn uses_default_api_token(&self) -> bool {
        self.api_token == DEFAULT_API_TOKEN
    }
}

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use puente_delivery::{
    start_requeue_scheduler, BackoffSender, DeliveryRetryPolicy, HttpWebhookTransport,
    RequeueSchedulerConfig, RequeueSweeper, SpilloverStore, WebhookTransportConfig,
};
use puente_gateway::{run_relay_gateway_server, RelayGatewayConfig, RelayGatewayState};
use puente_session::{
    start_session_supervisor, ConnectionGate, CredentialStore, EventRelay, SessionProvider,
    SidecarProviderConfig, WsSidecarProvider,
};

use crate::cli_args::Cli;

/// Wires every relay component and serves until Ctrl-C.
pub(crate) async fn run_relay(cli: Cli) -> Result<()> {
    if cli.uses_default_api_token() {
        tracing::warn!("API_TOKEN still has its default value; set a private token before exposing the relay");
    }

    let store = Arc::new(
        SpilloverStore::open(&cli.spool_dir)
            .with_context(|| format!("failed to open spool dir {}", cli.spool_dir.display()))?,
    );
    let transport = Arc::new(HttpWebhookTransport::new(WebhookTransportConfig::new(
        cli.server_url.as_str(),
        cli.api_token.as_str(),
    ))?);
    tracing::info!(
        endpoint = %transport.endpoint(),
        spool_dir = %store.dir().display(),
        "webhook delivery configured"
    );
    let sender = BackoffSender::new(transport, Arc::clone(&store), DeliveryRetryPolicy::default());

    let sweeper = Arc::new(RequeueSweeper::new(sender.clone()));
    let mut scheduler = start_requeue_scheduler(
        sweeper,
        RequeueSchedulerConfig {
            interval: Duration::from_secs(cli.requeue_interval_seconds),
        },
    )?;

    let provider: Arc<dyn SessionProvider> = Arc::new(WsSidecarProvider::new(
        SidecarProviderConfig::new(cli.sidecar_url.as_str()),
    ));
    let relay = EventRelay::new(sender, ConnectionGate::default(), Arc::clone(&provider));
    let mut supervisor = start_session_supervisor(
        provider,
        relay.clone(),
        CredentialStore::new(&cli.session_dir),
        scheduler.trigger(),
    )?;

    let gateway_config = RelayGatewayConfig {
        bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, cli.port)),
    };
    let state = Arc::new(RelayGatewayState::new(
        relay,
        Arc::clone(&store),
        cli.api_token.as_str(),
    ));
    let serve_result = run_relay_gateway_server(gateway_config, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
    })
    .await;

    supervisor.shutdown().await;
    scheduler.shutdown().await;
    serve_result
}

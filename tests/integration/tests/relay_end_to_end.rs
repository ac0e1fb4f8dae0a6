use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message as ServerWsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use httpmock::Method::POST;
use httpmock::MockServer;
use puente_delivery::{
    start_requeue_scheduler, BackoffSender, DeliveryRetryPolicy, HttpWebhookTransport,
    RequeueSchedulerConfig, RequeueSweeper, SpilloverStore, WebhookTransportConfig,
};
use puente_gateway::{build_relay_gateway_router, RelayGatewayState, SEND_MESSAGE_ENDPOINT};
use puente_session::{
    start_session_supervisor, ConnectionGate, CredentialStore, EventRelay, SessionProvider,
    SidecarProviderConfig, SupervisorExit, WsSidecarProvider,
};
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const TOKEN: &str = "token-integracion";

#[derive(Clone)]
struct FakeSidecar {
    script_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>>,
    received: Arc<Mutex<Vec<Value>>>,
}

async fn upgrade_fake_sidecar(
    State(state): State<FakeSidecar>,
    websocket: WebSocketUpgrade,
) -> Response {
    websocket.on_upgrade(move |socket| run_fake_sidecar(socket, state))
}

/// Plays frames pushed by the test and acknowledges every send request.
async fn run_fake_sidecar(socket: WebSocket, state: FakeSidecar) {
    let (mut sink, mut stream) = socket.split();
    let mut script = state.script_rx.lock().await;
    loop {
        tokio::select! {
            scripted = script.recv() => {
                let Some(frame) = scripted else {
                    break;
                };
                if frame["type"] == "test.close" {
                    let _ = sink.send(ServerWsMessage::Close(None)).await;
                    break;
                }
                if sink.send(ServerWsMessage::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                let Some(Ok(ServerWsMessage::Text(text))) = inbound else {
                    break;
                };
                let frame: Value = serde_json::from_str(text.as_str()).expect("bridge frame");
                state.received.lock().expect("received").push(frame.clone());
                if frame["type"] == "send" {
                    let reply = json!({"type": "send.result", "requestId": frame["requestId"], "ok": true});
                    let _ = sink.send(ServerWsMessage::Text(reply.to_string().into())).await;
                }
            }
        }
    }
}

async fn spawn_router(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral listener");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    addr
}

async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {description}");
}

fn credentials_saved(session_dir: &Path) -> bool {
    session_dir.join("creds.json").exists()
}

async fn post_send(addr: SocketAddr, numero: &str, texto: &str) -> u16 {
    reqwest::Client::new()
        .post(format!("http://{addr}{SEND_MESSAGE_ENDPOINT}"))
        .bearer_auth(TOKEN)
        .json(&json!({"numero": numero, "texto": texto}))
        .send()
        .await
        .expect("send request")
        .status()
        .as_u16()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_relay_spills_during_outage_requeues_on_recovery_and_gates_sends() {
    let temp = tempdir().expect("tempdir");
    let session_dir = temp.path().join("sesion_wa");

    let webhook_server = MockServer::start_async().await;
    let mut outage = webhook_server.mock(|when, then| {
        when.method(POST).path("/webhook");
        then.status(503);
    });

    let store = Arc::new(SpilloverStore::open(temp.path().join("cola_mensajes")).expect("store"));
    let transport = Arc::new(
        HttpWebhookTransport::new(WebhookTransportConfig::new(webhook_server.base_url(), TOKEN))
            .expect("transport"),
    );
    let sender = BackoffSender::new(
        transport,
        Arc::clone(&store),
        DeliveryRetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        },
    );
    let mut scheduler = start_requeue_scheduler(
        Arc::new(RequeueSweeper::new(sender.clone())),
        RequeueSchedulerConfig {
            interval: Duration::from_secs(3_600),
        },
    )
    .expect("scheduler");

    let (script_tx, script_rx) = mpsc::unbounded_channel();
    let sidecar = FakeSidecar {
        script_rx: Arc::new(tokio::sync::Mutex::new(script_rx)),
        received: Arc::new(Mutex::new(Vec::new())),
    };
    let sidecar_addr = spawn_router(
        Router::new()
            .route("/session", get(upgrade_fake_sidecar))
            .with_state(sidecar.clone()),
    )
    .await;

    let provider: Arc<dyn SessionProvider> = Arc::new(WsSidecarProvider::new(
        SidecarProviderConfig::new(format!("ws://{sidecar_addr}/session")),
    ));
    let gate = ConnectionGate::default();
    let relay = EventRelay::new(sender, gate.clone(), Arc::clone(&provider));
    let mut supervisor = start_session_supervisor(
        provider,
        relay.clone(),
        CredentialStore::new(&session_dir),
        scheduler.trigger(),
    )
    .expect("supervisor");
    let gateway_addr = spawn_router(build_relay_gateway_router(Arc::new(
        RelayGatewayState::new(relay, Arc::clone(&store), TOKEN),
    )))
    .await;

    script_tx
        .send(json!({"type": "creds.update", "creds": {"me": {"id": "5215550009999@s.whatsapp.net"}}}))
        .expect("script creds");
    script_tx
        .send(json!({"type": "connection.update", "connection": "open"}))
        .expect("script open");
    wait_until("gate to connect", || gate.is_connected()).await;
    wait_until("credentials to persist", || credentials_saved(&session_dir)).await;

    script_tx
        .send(json!({
            "type": "messages.upsert",
            "messages": [{
                "key": {"remoteJid": "5215550001111@s.whatsapp.net", "fromMe": false},
                "message": {"conversation": "hola"}
            }]
        }))
        .expect("script message");
    wait_until("payload to spill", || {
        store.pending_count().map(|count| count == 1).unwrap_or(false)
    })
    .await;
    outage.assert_calls(3);

    outage.delete();
    let recovered = webhook_server.mock(|when, then| {
        when.method(POST)
            .path("/webhook")
            .header("authorization", format!("Bearer {TOKEN}"))
            .json_body(json!({
                "remitente": "5215550001111@s.whatsapp.net",
                "contenido": "hola",
                "imagen": null
            }));
        then.status(200);
    });
    scheduler.trigger().trigger();
    wait_until("spillover to drain", || {
        store.pending_count().map(|count| count == 0).unwrap_or(false)
    })
    .await;
    recovered.assert_calls(1);

    assert_eq!(post_send(gateway_addr, "5215550001111@s.whatsapp.net", "recibido").await, 200);
    let sends = sidecar
        .received
        .lock()
        .expect("received")
        .iter()
        .filter(|frame| frame["type"] == "send")
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0]["text"], json!("recibido"));

    script_tx
        .send(json!({
            "type": "connection.update",
            "connection": "close",
            "lastDisconnect": {"statusCode": 401, "message": "logged out"}
        }))
        .expect("script logout");
    wait_until("gate to disconnect", || !gate.is_connected()).await;
    assert_eq!(post_send(gateway_addr, "5215550001111@s.whatsapp.net", "otro").await, 503);

    assert_eq!(supervisor.shutdown().await, Some(SupervisorExit::LoggedOut));
    scheduler.shutdown().await;
    let hellos = sidecar
        .received
        .lock()
        .expect("received")
        .iter()
        .filter(|frame| frame["type"] == "hello")
        .count();
    assert_eq!(hellos, 1);
}

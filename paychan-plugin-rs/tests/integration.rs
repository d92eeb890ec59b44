mod claim_backend;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration as ChronoDuration, Utc};
use claim_backend::*;
use paychan_plugin_rs::{Config, Plugin, PluginEvent, RequestHandler, Service};
use paychan_rs::{
    condition_from_preimage,
    rpc::{Method, RpcClient, RpcError, RpcRequest, RpcResponse},
    types::{Message, Transfer, TransferState},
    Error, MaxValueTracker, MemoryStore, PluginContext, SettlementBackend, StateFactory,
    TransferLog,
};
use serde_json::json;
use std::{net::Ipv4Addr, sync::Arc, time::Duration};
use tokio::sync::broadcast::Receiver;
use url::Url;
use uuid::Uuid;

fn setup_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "error".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn config(port: u16, peer_port: u16, stateful: bool) -> Config {
    Config {
        host: Ipv4Addr::LOCALHOST,
        port,
        prefix: "peer.t.".to_string(),
        token: Some("secret".to_string()),
        rpc_uri: Some(format!("http://127.0.0.1:{peer_port}/rpc")),
        rpc_uris: vec![],
        tolerate_rpc_failure: false,
        max_balance: None,
        min_balance: None,
        info: Some(json!({ "currencyScale": 9 })),
        stateful,
        store_path: None,
    }
}

async fn spawn_peer(config: Config, backend: Option<Arc<ClaimBackend>>) -> Plugin {
    let mut service = Service::from(config);
    if let Some(backend) = backend {
        service = service.with_backend(backend);
    }
    let (plugin, server) = service.build().await.unwrap();
    std::mem::drop(server.spawn());
    plugin.connect().await.unwrap();
    plugin
}

fn drain(rx: &mut Receiver<PluginEvent>) -> Vec<PluginEvent> {
    let mut events = vec![];
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn names(events: &[PluginEvent]) -> Vec<&'static str> {
    events.iter().map(|event| event.name()).collect()
}

fn transfer(id: Uuid, amount: &str, from: &str, to: &str, preimage: &[u8; 32]) -> Transfer {
    Transfer {
        id,
        amount: amount.to_string(),
        ledger: "peer.t.".to_string(),
        from: from.to_string(),
        to: to.to_string(),
        execution_condition: condition_from_preimage(preimage),
        expires_at: Utc::now() + ChronoDuration::seconds(60),
        ilp: None,
        note_to_self: None,
    }
}

#[tokio::test]
async fn test_end_to_end_fulfillment() {
    setup_logging();

    let token = "secret";
    let backend_a = Arc::new(ClaimBackend::new(
        "peer.t.alice",
        "peer.t.bob",
        token,
        MaxValueTracker::ephemeral(MemoryStore::new()),
    ));
    let backend_b = Arc::new(ClaimBackend::new(
        "peer.t.bob",
        "peer.t.alice",
        token,
        MaxValueTracker::ephemeral(MemoryStore::new()),
    ));
    let a = spawn_peer(config(28451, 28452, true), Some(backend_a.clone())).await;
    let b = spawn_peer(config(28452, 28451, true), Some(backend_b.clone())).await;
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    let preimage = [7u8; 32];
    let fulfillment = URL_SAFE_NO_PAD.encode(preimage);
    let id = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
    let mut outgoing = transfer(id, "100", "peer.t.alice", "peer.t.bob", &preimage);
    outgoing.note_to_self = Some(json!("local memo"));

    a.send_transfer(outgoing).await.unwrap();
    b.fulfill_condition(id, &fulfillment).await.unwrap();

    assert_eq!(a.transfer_log().get_outgoing_fulfilled(), "100");
    assert_eq!(b.transfer_log().get_incoming_fulfilled(), "100");
    assert_eq!(a.get_balance().await.unwrap(), "-100");
    assert_eq!(b.get_balance().await.unwrap(), "100");

    let a_names = names(&drain(&mut a_events));
    assert!(a_names.contains(&"outgoing_prepare"));
    assert!(a_names.contains(&"outgoing_fulfill"));
    let b_names = names(&drain(&mut b_events));
    assert!(b_names.contains(&"incoming_prepare"));
    assert!(b_names.contains(&"incoming_fulfill"));

    // the payer's local memo never crossed the wire
    let received = b.transfer_log().get(id).unwrap();
    assert_eq!(received.transfer.note_to_self, None);

    // the sender's backend secured the accumulated sum, the receiver's
    // backend accepted the claim
    assert!(backend_a.calls().contains(&BackendCall::CreateOutgoingClaim("100".to_string())));
    assert!(backend_b.calls().contains(&BackendCall::IncomingPrepare("100".to_string())));
    assert!(backend_b
        .calls()
        .iter()
        .any(|call| matches!(call, BackendCall::IncomingClaim(claim) if claim["value"] == "100")));
    assert_eq!(backend_b.best_claim.get_max().unwrap().value, "100");

    // the fulfillment round-tripped and is retrievable on the paying side
    assert_eq!(a.get_fulfillment(id).await.unwrap(), fulfillment);
}

#[tokio::test]
async fn test_bounds_rejection() {
    setup_logging();

    let token = "secret";
    let backend_a = Arc::new(ClaimBackend::new(
        "peer.t.alice",
        "peer.t.bob",
        token,
        MaxValueTracker::ephemeral(MemoryStore::new()),
    ));
    let backend_b = Arc::new(ClaimBackend::new(
        "peer.t.bob",
        "peer.t.alice",
        token,
        MaxValueTracker::ephemeral(MemoryStore::new()),
    ));
    let a = spawn_peer(config(28453, 28454, true), Some(backend_a)).await;
    let mut b_config = config(28454, 28453, true);
    b_config.max_balance = Some("50".to_string());
    let b = spawn_peer(b_config, Some(backend_b.clone())).await;
    let mut b_events = b.subscribe();

    let preimage = [9u8; 32];
    let id = Uuid::new_v4();
    a.send_transfer(transfer(id, "100", "peer.t.alice", "peer.t.bob", &preimage)).await.unwrap();

    // the receiver refused outright: no record, no events, no backend call
    assert!(b.transfer_log().get(id).is_none());
    assert_eq!(b.transfer_log().get_incoming_fulfilled_and_prepared(), "0");
    assert!(drain(&mut b_events).is_empty());
    assert_eq!(backend_b.calls(), vec![BackendCall::Connect]);

    // the sender keeps its prepared record; expiry will settle it
    let record = a.transfer_log().get(id).unwrap();
    assert_eq!(record.state, TransferState::Prepared);
}

#[tokio::test]
async fn test_expiry_cancels_on_both_sides() {
    setup_logging();

    let a = spawn_peer(config(28455, 28456, true), None).await;
    let b = spawn_peer(config(28456, 28455, false), None).await;
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    let preimage = [4u8; 32];
    let id = Uuid::new_v4();
    let mut outgoing = transfer(id, "100", "peer.t.server", "peer.t.client", &preimage);
    outgoing.expires_at = Utc::now() + ChronoDuration::seconds(1);
    a.send_transfer(outgoing).await.unwrap();

    assert_eq!(b.transfer_log().get(id).unwrap().state, TransferState::Prepared);

    // let both schedulers fire and the duplicate expire notifications cross
    tokio::time::sleep(Duration::from_secs(2)).await;

    let on_a = a.transfer_log().get(id).unwrap();
    assert_eq!(on_a.state, TransferState::Cancelled);
    assert_eq!(on_a.cancellation_reason, Some(json!("expired")));
    let on_b = b.transfer_log().get(id).unwrap();
    assert_eq!(on_b.state, TransferState::Cancelled);
    assert_eq!(on_b.cancellation_reason, Some(json!("expired")));

    let a_names = names(&drain(&mut a_events));
    assert_eq!(a_names.iter().filter(|name| **name == "outgoing_cancel").count(), 1);
    let b_names = names(&drain(&mut b_events));
    assert_eq!(b_names.iter().filter(|name| **name == "incoming_cancel").count(), 1);

    // prepared amounts were released again
    assert_eq!(a.transfer_log().get_outgoing_fulfilled_and_prepared(), "0");
    assert_eq!(b.transfer_log().get_incoming_fulfilled_and_prepared(), "0");
}

#[tokio::test]
async fn test_redelivered_prepare_records_once() {
    setup_logging();

    let b = spawn_peer(config(28457, 28458, true), None).await;
    let mut b_events = b.subscribe();

    let client = RpcClient::new(
        vec![Url::parse("http://127.0.0.1:28457/rpc").unwrap()],
        "peer.t.",
        "secret",
    );
    let preimage = [5u8; 32];
    let id = Uuid::new_v4();
    let incoming = transfer(id, "100", "peer.t.client", "peer.t.server", &preimage);
    let args = vec![serde_json::to_value(&incoming).unwrap()];

    // a network retry delivers the identical frame twice
    let first = client.call(Method::SendTransfer, args.clone()).await.unwrap();
    let second = client.call(Method::SendTransfer, args).await.unwrap();
    assert_eq!(first, json!(true));
    assert_eq!(second, json!(true));

    assert_eq!(b.transfer_log().get_incoming_fulfilled_and_prepared(), "100");
    let b_names = names(&drain(&mut b_events));
    assert_eq!(b_names.iter().filter(|name| **name == "incoming_prepare").count(), 1);
}

#[tokio::test]
async fn test_best_claim_is_monotone() {
    let store = MemoryStore::new();
    let tracker = MaxValueTracker::open(store.clone(), "YmVzdA").await.unwrap();
    let backend = ClaimBackend::new("peer.t.bob", "peer.t.alice", "secret", tracker.clone());
    let ctx = PluginContext::new(
        RpcClient::new(vec![Url::parse("http://127.0.0.1:9/rpc").unwrap()], "peer.t.", "secret"),
        StateFactory::new(store.clone()),
        TransferLog::ephemeral(store),
    );

    let mut observed = vec![];
    for value in ["30", "50", "40", "70"] {
        backend
            .handle_incoming_claim(&ctx, &json!({ "value": value, "signature": "stub" }))
            .await
            .unwrap();
        observed.push(tracker.get_max().unwrap().value);
    }
    // non-decreasing throughout, best claim wins
    assert_eq!(observed, vec!["30", "50", "50", "70"]);
}

#[tokio::test]
async fn test_fulfill_after_reject_is_refused() {
    setup_logging();

    let a = spawn_peer(config(28459, 28460, true), None).await;
    let b = spawn_peer(config(28460, 28459, false), None).await;
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    let preimage = [6u8; 32];
    let fulfillment = URL_SAFE_NO_PAD.encode(preimage);
    let id = Uuid::new_v4();
    a.send_transfer(transfer(id, "100", "peer.t.server", "peer.t.client", &preimage))
        .await
        .unwrap();

    b.reject_incoming_transfer(id, None).await.unwrap();
    assert_eq!(a.transfer_log().get(id).unwrap().state, TransferState::Cancelled);
    assert_eq!(b.transfer_log().get(id).unwrap().state, TransferState::Cancelled);
    assert!(names(&drain(&mut b_events)).contains(&"incoming_reject"));
    assert!(names(&drain(&mut a_events)).contains(&"outgoing_reject"));

    // the receiver can no longer fulfill locally
    assert!(matches!(b.fulfill_condition(id, &fulfillment).await, Err(Error::AlreadyRejected(_))));

    // a late fulfillment frame reaching the sender is refused outright
    let raw = RpcClient::new(
        vec![Url::parse("http://127.0.0.1:28459/rpc").unwrap()],
        "peer.t.",
        "secret",
    );
    let err =
        raw.call(Method::FulfillCondition, vec![json!(id), json!(fulfillment)]).await.unwrap_err();
    match err {
        RpcError::Peer { name, .. } => assert_eq!(name, "AlreadyRejectedError"),
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(a.transfer_log().get(id).unwrap().state, TransferState::Cancelled);
    assert_eq!(a.transfer_log().get_outgoing_fulfilled(), "0");
}

#[tokio::test]
async fn test_messaging_round_trip() {
    setup_logging();

    let a = spawn_peer(config(28461, 28462, true), None).await;
    let b = spawn_peer(config(28462, 28461, false), None).await;
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    a.send_message(Message {
        ledger: "peer.t.".to_string(),
        from: "peer.t.server".to_string(),
        to: "peer.t.client".to_string(),
        data: Some(json!({ "hello": "world" })),
    })
    .await
    .unwrap();
    assert!(names(&drain(&mut a_events)).contains(&"outgoing_message"));
    let received = drain(&mut b_events);
    assert!(names(&received).contains(&"incoming_message"));

    // request/response goes through the peer's registered handler
    let handler: RequestHandler = Arc::new(|request| {
        Box::pin(async move {
            Ok(Message {
                ledger: request.ledger.clone(),
                from: request.to.clone(),
                to: request.from.clone(),
                data: Some(json!({ "echo": request.data })),
            })
        })
    });
    b.register_request_handler(handler).unwrap();

    let response = a
        .send_request(Message {
            ledger: "peer.t.".to_string(),
            from: "peer.t.server".to_string(),
            to: "peer.t.client".to_string(),
            data: Some(json!("ping")),
        })
        .await
        .unwrap();
    assert_eq!(response.data, Some(json!({ "echo": "ping" })));
    assert_eq!(response.from, "peer.t.client");

    let a_names = names(&drain(&mut a_events));
    assert!(a_names.contains(&"outgoing_request"));
    assert!(a_names.contains(&"incoming_response"));
    let b_names = names(&drain(&mut b_events));
    assert!(b_names.contains(&"incoming_request"));
    assert!(b_names.contains(&"outgoing_response"));
}

#[tokio::test]
async fn test_stateless_side_proxies_queries() {
    setup_logging();

    let mut a_config = config(28463, 28464, true);
    a_config.max_balance = Some("1000".to_string());
    let a = spawn_peer(a_config, None).await;
    let b = spawn_peer(config(28464, 28463, false), None).await;

    let preimage = [8u8; 32];
    let fulfillment = URL_SAFE_NO_PAD.encode(preimage);
    let id = Uuid::new_v4();
    b.send_transfer(transfer(id, "100", "peer.t.client", "peer.t.server", &preimage))
        .await
        .unwrap();
    a.fulfill_condition(id, &fulfillment).await.unwrap();

    // the stateful side reads its own log, the stateless side gets the
    // peer's report with the sign flipped
    assert_eq!(a.get_balance().await.unwrap(), "100");
    assert_eq!(b.get_balance().await.unwrap(), "-100");
    assert_eq!(b.get_limit().await.unwrap(), "-1000");
    assert_eq!(b.get_info().await.unwrap(), json!({ "currencyScale": 9 }));
}

#[tokio::test]
async fn test_auth_and_unknown_methods_are_refused() {
    setup_logging();

    let _b = spawn_peer(config(28465, 28466, true), None).await;

    let bad = RpcClient::new(
        vec![Url::parse("http://127.0.0.1:28465/rpc").unwrap()],
        "peer.t.",
        "wrong-token",
    );
    let err = bad.call(Method::GetBalance, vec![]).await.unwrap_err();
    match err {
        RpcError::Peer { name, .. } => assert_eq!(name, "UnauthorizedError"),
        other => panic!("unexpected error: {other}"),
    }

    // a method outside the registered set gets a method error, not a parse
    // failure
    let response = reqwest::Client::new()
        .post("http://127.0.0.1:28465/rpc")
        .header("Authorization", "Bearer secret")
        .json(&RpcRequest {
            method: "open_channel".to_string(),
            prefix: "peer.t.".to_string(),
            args: vec![],
        })
        .send()
        .await
        .unwrap();
    let response: RpcResponse = response.json().await.unwrap();
    match response {
        RpcResponse::Err { error } => assert_eq!(error.name, "UnknownMethodError"),
        RpcResponse::Ok { .. } => panic!("expected an error response"),
    }
}

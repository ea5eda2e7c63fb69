//! Tests driving a bound [`WsRouteServer`] over real WebSockets.

mod common;

use std::{future, net::SocketAddr, num::NonZeroUsize, sync::Arc, time::Duration};

use common::{Journal, router};
use futures::{SinkExt, StreamExt};
use rstest::{fixture, rstest};
use tokio::{task::JoinHandle, time::timeout};
use tokio_tungstenite::tungstenite::Message;
use wsroute::{
    ConnectionManager,
    ProcessingConfig,
    server::{ServerConfig, ServerError, WsRouteServer},
};
use wsroute_testing::client::{connect, connect_with_protocols, rejection_status};

const WAIT: Duration = Duration::from_secs(2);

struct Running {
    addr: SocketAddr,
    manager: Arc<ConnectionManager>,
    journal: Arc<Journal>,
    handle: JoinHandle<Result<(), ServerError>>,
}

#[fixture]
fn config() -> ServerConfig {
    ServerConfig {
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        ..ServerConfig::default()
    }
}

async fn start(config: ServerConfig) -> Running {
    let journal = Arc::new(Journal::default());
    let server = WsRouteServer::bind(config, Arc::new(router(&journal)))
        .await
        .expect("bind");
    let addr = server.local_addr().expect("local addr");
    let manager = Arc::clone(server.manager());
    let handle = tokio::spawn(server.run_with_shutdown(future::pending()));
    Running {
        addr,
        manager,
        journal,
        handle,
    }
}

async fn wait_for_entries(journal: &Journal, count: usize) -> Vec<String> {
    timeout(WAIT, async {
        loop {
            let entries = journal.entries();
            if entries.len() >= count {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("entries recorded in time")
}

#[rstest]
#[tokio::test]
async fn negotiated_token_opens_a_routed_connection(config: ServerConfig) {
    let server = start(ServerConfig {
        require_token: true,
        ..config
    })
    .await;
    let token = server.manager.negotiate("json").expect("negotiate").token;

    let mut client = connect(server.addr, Some(&token)).await.expect("upgrade");
    client
        .send(Message::text(r#"{"key":"ping"}"#))
        .await
        .expect("send ping");
    client
        .send(Message::text(r#"{"key":"echo","text":"over the wire"}"#))
        .await
        .expect("send echo");

    let entries = wait_for_entries(&server.journal, 2).await;
    assert!(entries[0].starts_with("ping:"), "entries={entries:?}");
    assert_eq!(entries[1], "over the wire");
    assert_eq!(server.manager.active_count(), 1);

    client.close(None).await.expect("close");
    server.manager.shutdown();
    server.handle.await.expect("join").expect("clean stop");
}

#[rstest]
#[tokio::test]
async fn tokens_cannot_be_reused(config: ServerConfig) {
    let server = start(config).await;
    let token = server.manager.negotiate("json").expect("negotiate").token;

    let _client = connect(server.addr, Some(&token)).await.expect("first upgrade");
    assert_eq!(rejection_status(server.addr, Some(&token)).await, Some(401));

    server.manager.shutdown();
    server.handle.await.expect("join").expect("clean stop");
}

#[rstest]
#[case::required(true, Some(401))]
#[case::optional(false, None)]
#[tokio::test]
async fn tokenless_upgrades_follow_the_config(
    config: ServerConfig,
    #[case] require_token: bool,
    #[case] expected: Option<u16>,
) {
    let server = start(ServerConfig {
        require_token,
        ..config
    })
    .await;

    assert_eq!(rejection_status(server.addr, None).await, expected);

    server.manager.shutdown();
    server.handle.await.expect("join").expect("clean stop");
}

#[rstest]
#[tokio::test]
async fn requested_protocol_is_echoed(config: ServerConfig) {
    let server = start(config).await;

    let (_client, echoed) = connect_with_protocols(server.addr, "msgpack,json")
        .await
        .expect("upgrade");
    assert_eq!(echoed.as_deref(), Some("json"));
    assert!(connect_with_protocols(server.addr, "xml").await.is_err());

    server.manager.shutdown();
    server.handle.await.expect("join").expect("clean stop");
}

#[rstest]
#[tokio::test]
async fn oversized_message_closes_the_connection(config: ServerConfig) {
    let server = start(ServerConfig {
        processing: ProcessingConfig::default()
            .with_receive_chunk_size(NonZeroUsize::new(8).expect("non-zero"))
            .with_max_message_size(NonZeroUsize::new(32).expect("non-zero")),
        ..config
    })
    .await;
    let mut client = connect(server.addr, None).await.expect("upgrade");

    client
        .send(Message::text(format!(r#"{{"key":"echo","text":"{}"}}"#, "x".repeat(64))))
        .await
        .expect("send");

    let next = timeout(WAIT, client.next()).await.expect("server reacts");
    assert!(
        matches!(next, None | Some(Ok(Message::Close(_)) | Err(_))),
        "next={next:?}"
    );
    assert!(server.journal.entries().is_empty());
    timeout(WAIT, async {
        while server.manager.active_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection deregistered");

    server.manager.shutdown();
    server.handle.await.expect("join").expect("clean stop");
}

#[rstest]
#[tokio::test]
async fn shutdown_closes_open_connections(config: ServerConfig) {
    let server = start(config).await;
    let mut client = connect(server.addr, None).await.expect("upgrade");

    server.manager.shutdown();
    timeout(WAIT, server.handle)
        .await
        .expect("server stops")
        .expect("join")
        .expect("clean stop");

    let next = timeout(WAIT, client.next()).await.expect("client notified");
    assert!(
        matches!(next, None | Some(Ok(Message::Close(_)) | Err(_))),
        "next={next:?}"
    );
}

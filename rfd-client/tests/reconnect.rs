mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use rfd_client::{cmd, Client, ClientError, ClientResult, ConnectionState, ReconnectPolicy, Reply};
use tokio::sync::mpsc;

use common::{within, Behavior, TestServer};

#[tokio::test]
async fn dropped_connection_fails_pending_and_reconnects() -> Result<()> {
    let server = TestServer::start(Behavior::DropFirstAfter(2)).await;
    let client = Client::new(
        server
            .config()
            .reconnect_policy(ReconnectPolicy::Fixed {
                delay_ms: 300,
                max_attempts: Some(5),
            })
            .build(),
    )?;

    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
    client.on_ready(move || {
        let _ = ready_tx.send(());
    });
    let errors = Arc::new(Mutex::new(Vec::new()));
    let (error_tx, mut error_rx) = mpsc::unbounded_channel();
    let seen = errors.clone();
    client.on_error(move |err: &ClientError| {
        seen.lock().push(err.clone());
        let _ = error_tx.send(());
    });

    within(ready_rx.recv()).await;
    let results: Arc<Mutex<Vec<ClientResult<Reply>>>> = Arc::default();
    for _ in 0..2 {
        let results = results.clone();
        client.raw_call(cmd!["GET", "k"], move |result| results.lock().push(result))?;
    }

    // The server hangs up after reading both commands.
    within(error_rx.recv()).await;
    {
        let results = results.lock();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|result| matches!(result, Err(ClientError::ConnectionClosed))));
    }
    assert_eq!(errors.lock().len(), 1);
    assert!(errors.lock()[0].is_fatal());

    // Waiting out the reconnect delay: no socket, so not ready.
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert!(
        tokio::time::timeout(Duration::from_millis(50), client.wait_ready())
            .await
            .is_err(),
        "wait_ready resolved during the reconnect delay"
    );
    assert_eq!(server.connections(), 1);

    within(ready_rx.recv()).await;
    assert_eq!(client.state(), ConnectionState::Ready);
    within(client.wait_ready()).await?;
    assert_eq!(within(client.call(cmd!["PING"])).await?, Reply::simple("PONG"));
    assert_eq!(server.connections(), 2);
    Ok(())
}

#[tokio::test]
async fn without_reconnect_a_drop_closes_the_client() -> Result<()> {
    let server = TestServer::start(Behavior::DropFirstAfter(1)).await;
    let client = Client::new(server.config().build())?;
    let (end_tx, mut end_rx) = mpsc::unbounded_channel();
    client.on_end(move || {
        let _ = end_tx.send(());
    });

    let result = within(client.call(cmd!["GET", "k"])).await;
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    within(end_rx.recv()).await;

    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(
        client.call(cmd!["PING"]).await,
        Err(ClientError::NotConnected)
    ));
    Ok(())
}

#[tokio::test]
async fn connect_retries_are_bounded_by_policy() -> Result<()> {
    common::init_tracing();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let client = Client::new(
        rfd_client::ClientConfig::builder()
            .port(port)
            .reconnect_policy(ReconnectPolicy::Backoff {
                initial_ms: 5,
                max_ms: 20,
                max_attempts: Some(3),
            })
            .build(),
    )?;
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    client.on_error(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(within(client.wait_ready()).await.is_err());
    within(client.closed()).await;
    assert_eq!(failures.load(Ordering::SeqCst), 4);
    Ok(())
}

#[tokio::test]
async fn end_during_backoff_stops_reconnecting() -> Result<()> {
    common::init_tracing();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let client = Client::new(
        rfd_client::ClientConfig::builder()
            .port(port)
            .reconnect(true)
            .build(),
    )?;
    let (error_tx, mut error_rx) = mpsc::unbounded_channel();
    client.on_error(move |_| {
        let _ = error_tx.send(());
    });

    within(error_rx.recv()).await;
    client.end();
    within(client.closed()).await;
    assert_eq!(client.state(), ConnectionState::Closed);
    Ok(())
}

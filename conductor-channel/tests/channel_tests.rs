use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use conductor_channel::{ChannelError, ClientChannel, FnHandler, MessageHandler, ServerChannel};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::oneshot;

const EXCHANGE_TIMEOUT: Option<Duration> = Some(Duration::from_secs(2));

fn echo_upper() -> Arc<dyn MessageHandler> {
    Arc::new(FnHandler(|message: String| message.to_uppercase()))
}

struct SlowHandler(Duration);

#[async_trait]
impl MessageHandler for SlowHandler {
    async fn handle(&self, message: String) -> String {
        tokio::time::sleep(self.0).await;
        message
    }
}

#[tokio::test]
async fn request_gets_handler_response() {
    let dir = TempDir::new().expect("tempdir");
    let server = ServerChannel::for_name(dir.path(), "session-a", echo_upper()).expect("listen");
    let client = ClientChannel::for_name(dir.path(), "session-a").expect("client");

    assert_eq!(
        client.send_receive("reconfigure", EXCHANGE_TIMEOUT).await.as_deref(),
        Some("RECONFIGURE")
    );
    // The server keeps serving after the first exchange.
    assert_eq!(
        client.send_receive("stop", EXCHANGE_TIMEOUT).await.as_deref(),
        Some("STOP")
    );

    server.close().await;
}

#[tokio::test]
async fn empty_response_reads_as_none() {
    let dir = TempDir::new().expect("tempdir");
    let handler: Arc<dyn MessageHandler> = Arc::new(FnHandler(|_: String| String::new()));
    let server = ServerChannel::for_name(dir.path(), "quiet", handler).expect("listen");
    let client = ClientChannel::for_name(dir.path(), "quiet").expect("client");

    let started = Instant::now();
    assert_eq!(client.send_receive("PING", EXCHANGE_TIMEOUT).await, None);
    assert!(started.elapsed() < Duration::from_secs(2), "server should hang up promptly");

    server.close().await;
}

#[tokio::test]
async fn missing_server_times_out_with_none() {
    let dir = TempDir::new().expect("tempdir");
    let client = ClientChannel::for_name(dir.path(), "nobody").expect("client");

    let started = Instant::now();
    let response = client
        .send_receive("STOP", Some(Duration::from_millis(200)))
        .await;
    assert_eq!(response, None);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn slow_handler_exceeds_client_timeout() {
    let dir = TempDir::new().expect("tempdir");
    let server = ServerChannel::for_name(
        dir.path(),
        "slow",
        Arc::new(SlowHandler(Duration::from_secs(2))),
    )
    .expect("listen");
    let client = ClientChannel::for_name(dir.path(), "slow").expect("client");

    let response = client
        .send_receive("STOP", Some(Duration::from_millis(200)))
        .await;
    assert_eq!(response, None);

    drop(server);
}

#[tokio::test]
async fn client_waits_for_late_server() {
    let dir = TempDir::new().expect("tempdir");
    let client = ClientChannel::for_name(dir.path(), "late").expect("client");

    let pending = tokio::spawn(async move { client.send_receive("hello", EXCHANGE_TIMEOUT).await });
    tokio::time::sleep(Duration::from_millis(150)).await;
    let server = ServerChannel::for_name(dir.path(), "late", echo_upper()).expect("listen");

    let response = pending.await.expect("join");
    assert_eq!(response.as_deref(), Some("HELLO"));

    server.close().await;
}

#[tokio::test]
async fn async_exchange_invokes_callback() {
    let dir = TempDir::new().expect("tempdir");
    let server = ServerChannel::for_name(dir.path(), "cb", echo_upper()).expect("listen");
    let client = ClientChannel::for_name(dir.path(), "cb").expect("client");

    let (tx, rx) = oneshot::channel();
    client.send_async_receive(
        "reconfigure",
        EXCHANGE_TIMEOUT,
        Some(move |response: Option<String>| {
            let _ = tx.send(response);
        }),
    );

    let response = tokio::time::timeout(Duration::from_secs(3), rx)
        .await
        .expect("callback in time")
        .expect("callback fired");
    assert_eq!(response.as_deref(), Some("RECONFIGURE"));

    server.close().await;
}

#[tokio::test]
async fn async_exchange_without_server_reports_none() {
    let dir = TempDir::new().expect("tempdir");
    let client = ClientChannel::for_name(dir.path(), "gone").expect("client");

    let (tx, rx) = oneshot::channel();
    client.send_async_receive(
        "RECONFIGURE",
        Some(Duration::from_millis(100)),
        Some(move |response: Option<String>| {
            let _ = tx.send(response);
        }),
    );

    let response = tokio::time::timeout(Duration::from_secs(3), rx)
        .await
        .expect("callback in time")
        .expect("callback fired");
    assert_eq!(response, None);
}

#[tokio::test]
async fn server_survives_client_that_hangs_up_mid_frame() {
    let dir = TempDir::new().expect("tempdir");
    let server = ServerChannel::for_name(dir.path(), "sturdy", echo_upper()).expect("listen");

    let mut raw = UnixStream::connect(server.path()).await.expect("connect");
    raw.write_all(&[0x00, 0x10, 0x41]).await.expect("partial frame");
    drop(raw);

    let client = ClientChannel::new(server.path());
    assert_eq!(
        client.send_receive("after", EXCHANGE_TIMEOUT).await.as_deref(),
        Some("AFTER")
    );

    server.close().await;
}

#[tokio::test]
async fn second_listener_on_live_socket_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let server = ServerChannel::for_name(dir.path(), "taken", echo_upper()).expect("listen");

    let result = ServerChannel::for_name(dir.path(), "taken", echo_upper());
    assert!(matches!(result, Err(ChannelError::AlreadyInUse { .. })));

    server.close().await;
}

#[tokio::test]
async fn close_removes_socket_file() {
    let dir = TempDir::new().expect("tempdir");
    let server = ServerChannel::for_name(dir.path(), "bye", echo_upper()).expect("listen");
    let path = server.path().to_path_buf();
    assert!(path.exists());

    server.close().await;
    assert!(!path.exists());

    let client = ClientChannel::new(&path);
    assert_eq!(
        client.send_receive("x", Some(Duration::from_millis(150))).await,
        None
    );
}

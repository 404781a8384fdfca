//! Wire-level framing tests: the server loop is driven over in-memory pipes
//! instead of stdio.

use std::sync::Arc;
use std::time::Duration;

use iex_dap::server::DapServer;
use iex_repl::process::mock::MockReplSpawner;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

const INITIALIZE_REQUEST: &str =
    r#"{"seq":1,"type":"request","command":"initialize","arguments":{"adapterID":"iex"}}"#;

fn frame(payload: &str) -> String {
    format!("Content-Length: {}\r\n\r\n{}", payload.len(), payload)
}

/// Starts the server on one end of a duplex pipe and hands back the client
/// end.
fn spawn_server() -> DuplexStream {
    let (client, server_side) = duplex(4096);
    let (reader, writer) = tokio::io::split(server_side);
    tokio::spawn(async move {
        let server = DapServer::new(Arc::new(MockReplSpawner::new()));
        let _ = server.run(reader, writer).await;
    });
    client
}

/// Reads frames off the client end until the accumulated bytes contain
/// `needle`.
async fn read_until(client: &mut DuplexStream, needle: &str) -> String {
    let mut collected = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut buf = [0u8; 1024];
        loop {
            let n = client.read(&mut buf).await.expect("read from server");
            assert!(n > 0, "server closed the stream before replying");
            collected.push_str(&String::from_utf8_lossy(&buf[..n]));
            if collected.contains(needle) {
                break;
            }
        }
    })
    .await
    .expect("server replies within the deadline");
    collected
}

#[tokio::test]
async fn responds_to_a_framed_request() {
    let mut client = spawn_server();
    client
        .write_all(frame(INITIALIZE_REQUEST).as_bytes())
        .await
        .expect("write request");

    let output = read_until(&mut client, r#""success":true"#).await;
    assert!(output.starts_with("Content-Length:"));
}

#[tokio::test]
async fn headers_other_than_content_length_are_ignored() {
    let mut client = spawn_server();
    let framed = format!(
        "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
        INITIALIZE_REQUEST.len(),
        INITIALIZE_REQUEST
    );
    client
        .write_all(framed.as_bytes())
        .await
        .expect("write request");

    read_until(&mut client, r#""success":true"#).await;
}

#[tokio::test]
async fn bad_content_length_does_not_end_the_session() {
    let mut client = spawn_server();
    client
        .write_all(b"Content-Length: twelve\r\n\r\n")
        .await
        .expect("write bad header block");
    client
        .write_all(frame(INITIALIZE_REQUEST).as_bytes())
        .await
        .expect("write request");

    read_until(&mut client, r#""success":true"#).await;
}

#[tokio::test]
async fn undecodable_body_is_dropped_not_fatal() {
    let mut client = spawn_server();
    client
        .write_all(frame("this is not a request").as_bytes())
        .await
        .expect("write junk frame");
    client
        .write_all(frame(INITIALIZE_REQUEST).as_bytes())
        .await
        .expect("write request");

    read_until(&mut client, r#""success":true"#).await;
}

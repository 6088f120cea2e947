#![allow(dead_code)]

use devo_sdk::sender::{Address, SenderOptions};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const TEST_HOST: &str = "test-host";

/// Accepts one connection on loopback and collects everything written to it
/// until the peer closes.
pub async fn capture_server() -> (Address, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        socket.read_to_end(&mut received).await.unwrap();
        received
    });
    (Address::new("127.0.0.1", port), handle)
}

pub fn options() -> SenderOptions {
    SenderOptions {
        hostname: Some(TEST_HOST.to_string()),
        ..Default::default()
    }
}

/// Splits captured plain records into lines, dropping the trailing empty one.
pub fn lines(received: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(received)
        .split_terminator('\n')
        .map(str::to_string)
        .collect()
}

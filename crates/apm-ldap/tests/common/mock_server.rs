// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scripted lookup service for testing the filter end to end

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

type Responses = Arc<HashMap<String, Vec<Vec<u8>>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Serve any number of requests per connection
    KeepAlive,
    /// Close the connection after answering one request
    CloseAfterResponse,
}

#[derive(Clone)]
pub struct MockLookupServer {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockLookupServer {
    /// Start a mock lookup service on a random port. Unknown paths are answered with `}`, an
    /// empty entry list.
    pub async fn start(responses: &[(&str, &str)], mode: ConnectionMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        Self::serve(listener, whole(responses), Duration::ZERO, mode)
    }

    /// Start a mock lookup service that writes each response as separate segments, pausing
    /// `delay` between them.
    pub async fn start_segmented(
        responses: &[(&str, &[&str])],
        delay: Duration,
        mode: ConnectionMode,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let responses = responses
            .iter()
            .map(|(path, segments)| {
                let segments = segments.iter().map(|s| s.as_bytes().to_vec()).collect();
                (path.to_string(), segments)
            })
            .collect();
        Self::serve(listener, responses, delay, mode)
    }

    /// Start a mock lookup service on a given port
    pub async fn start_on(port: u16, responses: &[(&str, &str)], mode: ConnectionMode) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("Failed to bind mock server");
        Self::serve(listener, whole(responses), Duration::ZERO, mode)
    }

    fn serve(
        listener: TcpListener,
        responses: HashMap<String, Vec<Vec<u8>>>,
        delay: Duration,
        mode: ConnectionMode,
    ) -> Self {
        let addr = listener.local_addr().expect("Failed to get local addr");
        let responses: Responses = Arc::new(responses);
        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let connections_clone = connections.clone();
        let requests_clone = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                connections_clone.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_connection(
                    stream,
                    responses.clone(),
                    requests_clone.clone(),
                    delay,
                    mode,
                ));
            }
        });

        Self {
            addr,
            connections,
            requests,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("lock poisoned").clone()
    }
}

fn whole(responses: &[(&str, &str)]) -> HashMap<String, Vec<Vec<u8>>> {
    responses
        .iter()
        .map(|(path, body)| (path.to_string(), vec![body.as_bytes().to_vec()]))
        .collect()
}

async fn handle_connection(
    mut stream: TcpStream,
    responses: Responses,
    requests: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    mode: ConnectionMode,
) {
    let mut buf = [0u8; 1024];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let path = String::from_utf8_lossy(&buf[..n]).into_owned();
        let segments = responses
            .get(&path)
            .cloned()
            .unwrap_or_else(|| vec![b"}".to_vec()]);
        requests.lock().expect("lock poisoned").push(path);

        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                sleep(delay).await;
            }
            if stream.write_all(segment).await.is_err() {
                return;
            }
        }
        if mode == ConnectionMode::CloseAfterResponse {
            break;
        }
    }
}

/// A loopback port nothing listens on.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    listener.local_addr().expect("Failed to get local addr").port()
}

#![allow(dead_code)] // Test helpers appear unused when compiled independently

use axum::Router;
use reqwest::Client;
use sensorpipe::ingest::{self, run_dispatch};
use sensorpipe::Pipeline;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const WAIT_ATTEMPTS: usize = 50;
const WAIT_DELAY: Duration = Duration::from_millis(100);

/// Router + ingest dispatcher running on a loopback port.
pub struct TestServer {
    pub base_url: String,
    pub pipeline: Arc<Pipeline>,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    dispatcher: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn ws_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.replace("http://", "ws://"), path)
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
        // Router dropped with the server, closing the ingest channel.
        if let Some(dispatcher) = self.dispatcher {
            let _ = dispatcher.await;
        }
    }
}

/// Find an available TCP port
pub async fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Best-effort check for whether binding to loopback is permitted in the current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

/// Serve `pipeline` on a free port and wait until it is healthy.
pub async fn spawn_app(pipeline: Arc<Pipeline>) -> TestServer {
    let (ingest_tx, ingest_rx) = ingest::channel(64);
    let dispatcher = tokio::spawn(run_dispatch(ingest_rx, pipeline.clone()));
    let app = sensorpipe::build_router(pipeline.clone(), ingest_tx);
    let mut server = spawn_router(app, pipeline).await;
    server.dispatcher = Some(dispatcher);
    server
}

/// Serve a prebuilt router with no ingest dispatcher attached.
pub async fn spawn_router(app: Router, pipeline: Arc<Pipeline>) -> TestServer {
    let port = free_port().await;
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("failed to bind test listener");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("test server error: {}", err);
        }
    });

    let base_url = format!("http://127.0.0.1:{}", port);
    wait_for_health(&Client::new(), &base_url).await;

    TestServer {
        base_url,
        pipeline,
        shutdown_tx,
        handle,
        dispatcher: None,
    }
}

/// Wait for a server to respond to /health
pub async fn wait_for_health(client: &Client, base_url: &str) {
    poll_until(|| async {
        client
            .get(format!("{}/health", base_url))
            .send()
            .await
            .ok()
            .map(|_| ())
    })
    .await
    .unwrap_or_else(|| panic!("timed out waiting for {} to be healthy", base_url));
}

/// Poll a JSON endpoint until `check` accepts the body.
pub async fn wait_for_json<F>(client: &Client, url: &str, check: F) -> serde_json::Value
where
    F: Fn(&serde_json::Value) -> bool,
{
    poll_until(|| async {
        let resp = client.get(url).send().await.ok()?;
        let body = resp.json::<serde_json::Value>().await.ok()?;
        check(&body).then_some(body)
    })
    .await
    .unwrap_or_else(|| panic!("timed out waiting for expected body at {}", url))
}

pub async fn poll_until<T, F, Fut>(mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..WAIT_ATTEMPTS {
        if let Some(result) = f().await {
            return Some(result);
        }
        tokio::time::sleep(WAIT_DELAY).await;
    }
    None
}

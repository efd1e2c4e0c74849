//! Request-reply demo over the in-memory transport: an echo worker
//! serves the "echo" role while ten producers wait on their responses.
//!
//! Run with: cargo run --example request_reply

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use replyq_client::{RequestClient, RequestHandler, RequestWorker};
use replyq_core::{logging::init_logging, Config, InMemoryTransport, Message, Role};

struct Echo;

#[async_trait]
impl RequestHandler for Echo {
    async fn handle(&self, request: &Message) -> replyq_core::Result<Option<Bytes>> {
        let body = String::from_utf8_lossy(&request.body);
        Ok(Some(Bytes::from(format!("{body} successfully processed!"))))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();
    init_logging(&config.logging)?;

    let transport = Arc::new(InMemoryTransport::new());
    let role = Role::from("echo");

    let worker = RequestWorker::new(transport.clone(), role.clone(), Arc::new(config.clone()));
    let cancel = worker.cancel_token();
    worker.spawn(Arc::new(Echo));

    let client = RequestClient::new(transport, config);
    client.start_role(&role).await?;

    let mut calls = Vec::new();
    for i in 0..10 {
        let client = client.clone();
        let role = role.clone();
        calls.push(tokio::spawn(async move {
            client
                .send_request(&role, format!("Hello world {i}"), Duration::from_secs(10))
                .await
        }));
    }

    for call in calls {
        let response = call.await??;
        println!("{}", String::from_utf8_lossy(&response.body));
    }

    cancel.cancel();
    client.stop_role(&role).await;
    client.shutdown().await;
    Ok(())
}

//! Fan-out Example
//!
//! An editor and two viewers share one document through an in-process hub.
//! The editor's incremental parses are diffed once and delivered to every viewer.
//!
//! Run with: cargo run -p mdlive-transport --example fanout

use std::sync::Arc;

use mdlive_core::{MarkdownRenderer, SessionManager};
use mdlive_protocol::ServerResponse;
use mdlive_transport::{ConnectionHandle, ConnectionHandler, Frame, Hub};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("mdlive Fan-out Example\n");

    let (hub, handle) = Hub::new(16);
    let coordinator = tokio::spawn(hub.run());
    let sessions = Arc::new(SessionManager::new(Arc::new(MarkdownRenderer::default())));

    let mut clients = Vec::new();
    for (id, name) in [(1, "editor"), (2, "viewer-a"), (3, "viewer-b")] {
        let (conn, rx) = ConnectionHandle::new(id, name, 32);
        handle.register(conn);
        let mut handler = ConnectionHandler::new(id, name, handle.clone(), sessions.clone());
        handler.process(r#"{"type":"subscribe","documentId":"notes:demo"}"#)?;
        clients.push((name, handler, rx));
    }

    let edits = [
        "# Shopping",
        "# Shopping\n\n- [ ] milk",
        "# Shopping\n\n- [x] milk\n- [ ] bread",
    ];
    for content in edits {
        let message = serde_json::json!({
            "type": "parse_incremental",
            "documentId": "notes:demo",
            "content": content,
        });
        clients[0].1.process(&message.to_string())?;
    }

    if let Some(stats) = handle.stats().await {
        println!(
            "hub: {} connections, {} subscriptions, {} frames delivered\n",
            stats.connections, stats.subscriptions, stats.frames_delivered
        );
    }

    for (name, _, rx) in clients.iter_mut() {
        println!("=== {} ===", name);
        drain(rx)?;
        println!();
    }

    drop(clients);
    drop(handle);
    coordinator.await?;
    Ok(())
}

fn drain(rx: &mut mpsc::Receiver<Frame>) -> Result<(), Box<dyn std::error::Error>> {
    while let Ok(frame) = rx.try_recv() {
        let response: ServerResponse = serde_json::from_str(&frame)?;
        let changes = response
            .data
            .as_ref()
            .and_then(|data| data["changes"].as_array())
            .map(|changes| {
                changes
                    .iter()
                    .map(|c| format!("{} {}", c["type"], c["block"]["type"]))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        println!("{:?} {}", response.kind, changes);
    }
    Ok(())
}

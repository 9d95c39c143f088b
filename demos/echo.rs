//! In-process echo round trip.
//!
//! Demonstrates:
//! - Connecting over the memory transport, upgrading polling to stream
//! - Registering handlers with `on`
//! - `emit`, `emit_with_ack` and namespaces through `io`
//!
//! The server half is scripted in this file: it answers the handshake and
//! the upgrade probe, echoes `msg` events back as `reply`, and acknowledges
//! `add` with the sum of its arguments.
//!
//! Usage:
//!   cargo run --example echo
//!   cargo run --example echo -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use socketio_client::transport::{MemoryFactory, MemoryListener, MemoryPeer, PROBE_PAYLOAD};
use socketio_client::{Client, Frame, FrameKind, MessageType, Packet, PacketKind, TransportKind};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const HANDSHAKE: &str =
    r#"{"sid":"demo","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":60000}"#;

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let debug = std::env::args().any(|arg| arg == "--debug");
    init_logging(debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "socketio_client=trace"
    } else {
        "socketio_client=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

async fn run() -> Result<()> {
    println!("=== Echo ===\n");

    let (polling, listener) = MemoryFactory::new(TransportKind::Polling);
    let stream = polling.sibling(TransportKind::Stream);
    let server = tokio::spawn(serve(listener));

    // ========================================================================
    // Connect
    // ========================================================================

    let client = Client::builder()
        .url("http://localhost:8000")
        .transport("stream")
        .factory(TransportKind::Polling, Arc::new(polling))
        .factory(TransportKind::Stream, Arc::new(stream))
        .connect()
        .await?;
    println!("[Connect] session {}", client.session_id());

    // ========================================================================
    // Emit
    // ========================================================================

    let (reply_tx, mut replies) = mpsc::unbounded_channel();
    let sink = reply_tx.clone();
    client.on("reply", move |text: String| {
        let _ = sink.send(format!("/ {text}"));
    })?;

    client.emit("msg", "hello").await?;
    let reply = timeout(REPLY_TIMEOUT, replies.recv())
        .await
        .context("no reply in time")?
        .context("reply channel closed")?;
    println!("[Emit] {reply}");

    // ========================================================================
    // Emit With Ack
    // ========================================================================

    let (sum_tx, mut sums) = mpsc::unbounded_channel();
    let id = client
        .emit_with_ack("add", (2, 3), move |sum: i64| {
            let _ = sum_tx.send(sum);
        })
        .await?;
    let sum = timeout(REPLY_TIMEOUT, sums.recv())
        .await
        .context("no acknowledgement in time")?
        .context("ack channel closed")?;
    println!("[Ack] id {id} answered with {sum}");

    // ========================================================================
    // Namespace
    // ========================================================================

    let chat = client.io("/chat");
    chat.on("reply", move |text: String| {
        let _ = reply_tx.send(format!("/chat {text}"));
    })?;
    chat.emit("msg", "hi chat").await?;
    let reply = timeout(REPLY_TIMEOUT, replies.recv())
        .await
        .context("no namespaced reply in time")?
        .context("reply channel closed")?;
    println!("[Io] {reply}");

    // ========================================================================
    // Close
    // ========================================================================

    client.close().await?;
    server.await??;
    println!("\n[Done] connection closed");

    Ok(())
}

// ============================================================================
// Server Half
// ============================================================================

async fn serve(mut listener: MemoryListener) -> Result<()> {
    let (_, probe) = listener.accept().await.context("no handshake request")?;
    probe.send(Frame::new(FrameKind::Open, HANDSHAKE))?;

    let (_, polling) = listener.accept().await.context("no confirm request")?;
    polling.send(Frame::message(MessageType::Text, "40"))?;

    let (_, stream) = listener.accept().await.context("no upgrade request")?;
    loop {
        let frame = stream.recv().await.context("stream closed during upgrade")?;
        match frame.kind {
            FrameKind::Ping if frame.is_probe() => {
                stream.send(Frame::new(FrameKind::Pong, PROBE_PAYLOAD))?;
            }
            FrameKind::Upgrade => break,
            _ => {}
        }
    }
    drop(polling);

    while let Some(frame) = stream.recv().await {
        match frame.kind {
            FrameKind::Ping => stream.send(Frame::new(FrameKind::Pong, frame.data))?,
            FrameKind::Message => echo(&stream, &frame.data)?,
            FrameKind::Close => break,
            _ => {}
        }
    }
    Ok(())
}

fn echo(stream: &MemoryPeer, data: &[u8]) -> Result<()> {
    let packet = Packet::decode(data)?;
    if packet.kind != PacketKind::Event {
        return Ok(());
    }

    let (name, args) = packet
        .payload
        .split_first()
        .context("event without a name")?;
    let namespace = packet.namespace.clone();

    let response = match (name.as_str(), packet.id) {
        (Some("add"), Some(id)) => {
            let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
            Packet::ack(namespace, id, vec![Value::from(sum)])
        }
        (_, Some(id)) => Packet::ack(namespace, id, args.to_vec()),
        (_, None) => Packet::event(namespace, "reply", args.to_vec(), None),
    };

    stream.send(Frame::message(MessageType::Text, response.encode()?))?;
    Ok(())
}

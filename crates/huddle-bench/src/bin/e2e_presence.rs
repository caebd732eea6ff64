//! End-to-end presence benchmark for Huddle.
//!
//! Connects many WebSocket clients to a running server. Every client
//! subscribes to one shared room, then joins and leaves it in a loop while
//! counting the presence events it receives.
//!
//! ```bash
//! huddle &
//! e2e_presence 32 ws://127.0.0.1:8080/ws
//! ```

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{codec, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";
const ROOM: &str = "bench-room";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("Huddle end-to-end presence benchmark");
    println!("  server:  {url}");
    println!("  clients: {num_clients}");
    println!("  warmup {WARMUP_SECS}s, measurement {BENCH_SECS}s");
    println!();

    run_benchmark(&url, num_clients).await;
}

async fn run_benchmark(url: &str, num_clients: usize) {
    let events = Arc::new(AtomicU64::new(0));
    let actions = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let handles: Vec<_> = (0..num_clients)
        .map(|client_id| {
            let url = url.to_string();
            let events = Arc::clone(&events);
            let actions = Arc::clone(&actions);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                if let Err(e) = run_client(&url, client_id, events, actions, barrier).await {
                    eprintln!("Client {client_id} error: {e}");
                }
            })
        })
        .collect();

    barrier.wait().await;
    println!("All {num_clients} clients subscribed");

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    events.store(0, Ordering::SeqCst);
    actions.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;
    let elapsed = start.elapsed().as_secs_f64();

    let total_events = events.load(Ordering::SeqCst);
    let total_actions = actions.load(Ordering::SeqCst);

    println!();
    println!("Results");
    println!("  duration:        {elapsed:>12.2} s");
    println!("  actions sent:    {total_actions:>12}");
    println!("  actions/s:       {:>12.0}", total_actions as f64 / elapsed);
    println!("  events received: {total_events:>12}");
    println!("  events/s:        {:>12.0}", total_events as f64 / elapsed);

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: &str,
    client_id: usize,
    events: Arc<AtomicU64>,
    actions: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // Connected frame
    receiver.next().await;

    let subscribe = codec::encode(&Frame::subscribe(client_id as u64, ROOM))?;
    sender.send(Message::Binary(subscribe.to_vec())).await?;

    // Subscribe ack
    receiver.next().await;

    barrier.wait().await;

    let username = format!("user-{client_id}");
    let join = Message::Binary(codec::encode(&Frame::join(ROOM, &username))?.to_vec());
    let leave = Message::Binary(codec::encode(&Frame::leave(ROOM, &username))?.to_vec());

    let recv_task = tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(65536);
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Binary(data) = message {
                buf.extend_from_slice(&data);
                while let Ok(Some(frame)) = codec::decode_from(&mut buf) {
                    if matches!(frame, Frame::Event { .. }) {
                        events.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    });

    loop {
        if sender.send(join.clone()).await.is_err() || sender.send(leave.clone()).await.is_err() {
            break;
        }
        actions.fetch_add(2, Ordering::Relaxed);
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}

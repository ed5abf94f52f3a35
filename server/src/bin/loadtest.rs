//! Load test for the 8-ball server.
//!
//! Creates rooms through the lobby and seats two bot clients in each. Bots:
//! - Connect to their room
//! - Shoot the cue ball in a random direction whenever it is their turn
//! - Ask for a new game after game over
//!
//! Usage: cargo run --bin loadtest -- [OPTIONS]
//!
//! Options:
//!   --rooms N        Number of rooms to create (default: 50)
//!   --duration S     Test duration in seconds (default: 30)
//!   --addr ADDR      Server address (default: 127.0.0.1:9001)

use eightball_shared::protocol::{
    ClientMsg, CueShotMsg, LobbyRequest, LobbyResponse, RoomUpdateMsg, ServerMsg, Vec2Wire,
};
use futures_util::{SinkExt, StreamExt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Give up on a shot the server never picked up
const SHOT_RETRY: Duration = Duration::from_secs(3);

// === Metrics ===

#[derive(Default)]
struct Metrics {
    rooms_created: AtomicU64,
    connected: AtomicU64,
    updates_received: AtomicU64,
    shots_sent: AtomicU64,
    games_finished: AtomicU64,
    errors: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
}

// === Lobby ===

async fn lobby_call(addr: &str, request: &LobbyRequest) -> Result<String, String> {
    let (mut ws, _) = connect_async(format!("ws://{}/lobby", addr))
        .await
        .map_err(|e| e.to_string())?;
    let json = serde_json::to_string(request).map_err(|e| e.to_string())?;
    ws.send(Message::Text(json.into()))
        .await
        .map_err(|e| e.to_string())?;

    while let Some(msg) = ws.next().await {
        match msg.map_err(|e| e.to_string())? {
            Message::Text(text) => {
                let _ = ws.close(None).await;
                return match serde_json::from_str::<LobbyResponse>(text.as_str()) {
                    Ok(LobbyResponse::RoomReady { id }) => Ok(id),
                    Ok(LobbyResponse::Error { message, .. }) => Err(message),
                    Err(e) => Err(e.to_string()),
                };
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err("lobby closed without a reply".to_string())
}

async fn open_room(addr: &str, room_no: u32) -> Result<(String, [String; 2]), String> {
    let players = [format!("bot-{}-a", room_no), format!("bot-{}-b", room_no)];
    let id = lobby_call(
        addr,
        &LobbyRequest::CreateRoom {
            player: players[0].clone(),
            token: format!("{}-token", players[0]),
        },
    )
    .await?;
    lobby_call(
        addr,
        &LobbyRequest::JoinRoom {
            room: id.clone(),
            player: players[1].clone(),
            token: format!("{}-token", players[1]),
        },
    )
    .await?;
    Ok((id, players))
}

// === Bot ===

fn my_turn(update: &RoomUpdateMsg, me: &str) -> bool {
    let mine = update
        .players
        .iter()
        .find(|p| p.id == me)
        .and_then(|p| p.turn.as_deref());
    mine.is_some() && mine == update.turn.as_deref()
}

fn random_shot(update: &RoomUpdateMsg, rng: &mut ChaCha8Rng) -> Option<ClientMsg> {
    let cue = update.balls.iter().find(|b| b.color == "white")?;
    let angle = rng.gen_range(0.0..std::f64::consts::TAU);
    let strength = rng.gen_range(0.002..0.02);
    Some(ClientMsg::CueShot(CueShotMsg {
        ball_key: cue.key.clone(),
        impulse: Vec2Wire {
            x: angle.cos() * strength,
            y: angle.sin() * strength,
        },
    }))
}

async fn run_bot(addr: String, room: String, me: String, duration: Duration, metrics: Arc<Metrics>) {
    let url = format!("ws://{}/room/{}?player={}&token={}-token", addr, room, me, me);
    let connect_start = Instant::now();
    let (mut ws, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("{} failed to connect to {}: {}", me, room, e);
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    metrics
        .latency_sum_ms
        .fetch_add(connect_start.elapsed().as_millis() as u64, Ordering::Relaxed);
    metrics.latency_count.fetch_add(1, Ordering::Relaxed);
    metrics.connected.fetch_add(1, Ordering::Relaxed);

    let mut rng = ChaCha8Rng::from_entropy();
    let test_end = tokio::time::Instant::now() + duration;
    let mut shot_sent_at: Option<Instant> = None;
    let mut saw_roll = false;
    let mut asked_new_game = false;

    loop {
        let msg = tokio::select! {
            _ = tokio::time::sleep_until(test_end) => break,
            msg = ws.next() => msg,
        };

        let text = match msg {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                eprintln!("{} error: {}", me, e);
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                break;
            }
        };

        let update = match serde_json::from_str::<ServerMsg>(text.as_str()) {
            Ok(ServerMsg::RoomUpdate(update)) => update,
            Ok(ServerMsg::RoomClosed(closed)) => {
                eprintln!("{}: room {} closed: {}", me, room, closed.reason);
                break;
            }
            Ok(ServerMsg::Welcome(_)) => continue,
            Err(_) => {
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        metrics.updates_received.fetch_add(1, Ordering::Relaxed);

        if update.game_over {
            if !asked_new_game {
                asked_new_game = true;
                metrics.games_finished.fetch_add(1, Ordering::Relaxed);
                let json = serde_json::to_string(&ClientMsg::NewGame).unwrap_or_default();
                if ws.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            continue;
        }
        asked_new_game = false;

        if let Some(sent) = shot_sent_at {
            saw_roll |= update.shot_in_progress;
            let done = saw_roll && !update.shot_in_progress;
            if !done && sent.elapsed() < SHOT_RETRY {
                continue;
            }
            shot_sent_at = None;
            saw_roll = false;
        }

        if update.shot_in_progress || !my_turn(&update, &me) {
            continue;
        }
        let Some(shot) = random_shot(&update, &mut rng) else {
            continue;
        };
        let Ok(json) = serde_json::to_string(&shot) else {
            continue;
        };
        if ws.send(Message::Text(json.into())).await.is_err() {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            break;
        }
        metrics.shots_sent.fetch_add(1, Ordering::Relaxed);
        shot_sent_at = Some(Instant::now());
    }

    let _ = ws.close(None).await;
    metrics.connected.fetch_sub(1, Ordering::Relaxed);
}

// === Main ===

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut num_rooms: u32 = 50;
    let mut duration_secs: u64 = 30;
    let mut addr = "127.0.0.1:9001".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--rooms" => {
                i += 1;
                num_rooms = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(50);
            }
            "--duration" => {
                i += 1;
                duration_secs = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(30);
            }
            "--addr" => {
                i += 1;
                addr = args.get(i).cloned().unwrap_or(addr);
            }
            _ => {}
        }
        i += 1;
    }

    println!("=== 8-Ball Server Load Test ===");
    println!("Rooms: {} ({} bots)", num_rooms, num_rooms * 2);
    println!("Duration: {}s", duration_secs);
    println!("Address: {}", addr);
    println!();

    let metrics = Arc::new(Metrics::default());
    let duration = Duration::from_secs(duration_secs);
    let mut handles = Vec::with_capacity(num_rooms as usize * 2);

    println!("Opening {} rooms...", num_rooms);
    let spawn_start = Instant::now();

    for room_no in 0..num_rooms {
        let (room, players) = match open_room(&addr, room_no).await {
            Ok(room) => room,
            Err(e) => {
                eprintln!("Room {} failed: {}", room_no, e);
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        metrics.rooms_created.fetch_add(1, Ordering::Relaxed);

        for me in players {
            let addr = addr.clone();
            let room = room.clone();
            let metrics = Arc::clone(&metrics);
            handles.push(tokio::spawn(async move {
                run_bot(addr, room, me, duration, metrics).await;
            }));
        }

        // Stagger room creation slightly to avoid thundering herd
        if room_no % 25 == 24 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    println!("Rooms opened in {:?}", spawn_start.elapsed());
    println!();

    // Print stats periodically
    let metrics_clone = Arc::clone(&metrics);
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        let start = Instant::now();

        loop {
            interval.tick().await;
            let elapsed = start.elapsed().as_secs();
            println!(
                "[{:3}s] connected={}, updates={}, shots={}, games={}, errors={}",
                elapsed,
                metrics_clone.connected.load(Ordering::Relaxed),
                metrics_clone.updates_received.load(Ordering::Relaxed),
                metrics_clone.shots_sent.load(Ordering::Relaxed),
                metrics_clone.games_finished.load(Ordering::Relaxed),
                metrics_clone.errors.load(Ordering::Relaxed),
            );
        }
    });

    // Wait for all bots to finish
    for handle in handles {
        let _ = handle.await;
    }

    stats_handle.abort();

    // Final stats
    println!();
    println!("=== Final Results ===");
    let rooms = metrics.rooms_created.load(Ordering::Relaxed);
    let updates = metrics.updates_received.load(Ordering::Relaxed);
    let shots = metrics.shots_sent.load(Ordering::Relaxed);
    let latency_sum = metrics.latency_sum_ms.load(Ordering::Relaxed);
    let latency_count = metrics.latency_count.load(Ordering::Relaxed);

    println!("Rooms created: {}", rooms);
    println!("Total room updates received: {}", updates);
    println!("Total shots sent: {}", shots);
    println!(
        "Games finished: {}",
        metrics.games_finished.load(Ordering::Relaxed)
    );
    println!("Total errors: {}", metrics.errors.load(Ordering::Relaxed));

    if latency_count > 0 {
        println!("Average connect latency: {}ms", latency_sum / latency_count);
    }

    println!();
    println!(
        "Updates/sec (total): {:.0}",
        updates as f64 / duration_secs.max(1) as f64
    );
    println!(
        "Shots/sec (total): {:.1}",
        shots as f64 / duration_secs.max(1) as f64
    );
}

//! Subcommand implementations.

use crate::shapes::{Chat, Ping};
use crate::ui;

use async_trait::async_trait;
use relaynet_wire::{Connection, ConnectionHandler, Host, WireError};
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub type CmdResult = Result<(), Box<dyn Error>>;

/// Replies to every message with the same message.
pub struct EchoHandler;

#[async_trait]
impl ConnectionHandler for EchoHandler {
    async fn handle(&self, conn: Connection) {
        info!(peer = conn.peer_name(), "peer connected");
        loop {
            let env = match conn.receive().await {
                Ok(env) => env,
                Err(e) if e.is_recoverable_decode() => continue,
                Err(WireError::ConnectionClosed) => break,
                Err(e) => {
                    warn!(peer = conn.peer_name(), error = %e, "receive failed");
                    break;
                }
            };
            if let Some(chat) = env.downcast_ref::<Chat>() {
                info!(peer = conn.peer_name(), from = %chat.from, text = %chat.text, "chat");
            } else {
                debug!(peer = conn.peer_name(), type_name = env.type_name(), "echoing");
            }
            if let Err(e) = conn.send_dyn(env.message()).await {
                warn!(peer = conn.peer_name(), error = %e, "echo failed");
                break;
            }
        }
        info!(peer = conn.peer_name(), "peer disconnected");
    }
}

pub async fn cmd_listen(host: &Host, bind: &str) -> CmdResult {
    let listener = host.listen(bind, Arc::new(EchoHandler)).await?;

    ui::section("relaynet echo host");
    ui::kv("Name", host.name());
    ui::kv("Listening", &listener.local_addr().to_string());
    ui::kv("Shapes", &host.registry().len().to_string());

    tokio::signal::ctrl_c().await?;
    listener.shutdown();
    listener.join().await;
    ui::success("Stopped");
    Ok(())
}

pub async fn cmd_send(host: &Host, peer: &str, text: &str, count: u32) -> CmdResult {
    let conn = host.open(peer).await?;
    let chat = Chat {
        from: host.name().to_string(),
        text: text.to_string(),
    };

    for _ in 0..count {
        conn.send(&chat).await?;
        let reply = conn.receive().await?;
        match reply.downcast::<Chat>() {
            Ok(echo) => ui::incoming(conn.peer_name(), &echo.text),
            Err(other) => warn!(type_name = other.type_name(), "unexpected reply"),
        }
    }

    conn.close().await;
    Ok(())
}

pub async fn cmd_ping(host: &Host, peer: &str, count: u32) -> CmdResult {
    let conn = host.open(peer).await?;
    let mut rtts = Vec::with_capacity(count as usize);

    for seq in 0..u64::from(count) {
        let start = Instant::now();
        conn.send(&Ping { seq }).await?;
        let reply = conn.receive().await?;
        let rtt = start.elapsed();

        match reply.downcast_ref::<Ping>() {
            Some(pong) if pong.seq == seq => {
                ui::kv(&format!("seq={seq}"), &format_rtt(rtt));
                rtts.push(rtt);
            }
            _ => warn!(seq, type_name = reply.type_name(), "mismatched reply"),
        }
    }
    conn.close().await;

    if let Some(avg) = average(&rtts) {
        ui::success(&format!(
            "{}/{} replies, avg {}",
            rtts.len(),
            count,
            format_rtt(avg)
        ));
    }
    Ok(())
}

fn format_rtt(rtt: Duration) -> String {
    format!("{:.3} ms", rtt.as_secs_f64() * 1000.0)
}

fn average(samples: &[Duration]) -> Option<Duration> {
    let n = u32::try_from(samples.len()).ok().filter(|n| *n > 0)?;
    Some(samples.iter().sum::<Duration>() / n)
}

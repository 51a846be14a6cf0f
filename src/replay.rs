//! Streams a recorded GPS file into a running server's `/ws` endpoint, as if
//! the buses were reporting live.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
};

use crate::types::BusTrack;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub sent: usize,
    pub accepted: usize,
    pub rejected: usize,
}

/// Sends each entry of `tracks` (or only `bus_id`) as one frame and waits for
/// its ack before the next. Rejected packets are counted, not fatal.
pub async fn replay_tracks(
    url: &str,
    tracks: &[BusTrack],
    bus_id: Option<&str>,
    interval: Duration,
) -> Result<ReplaySummary> {
    let (ws, _) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {}", url))?;
    let (mut sink, mut stream) = ws.split();
    let mut summary = ReplaySummary::default();

    for track in tracks
        .iter()
        .filter(|t| bus_id.map_or(true, |id| t.bus_id == id))
    {
        for packet in track.packets() {
            let frame = serde_json::to_string(&packet)?;
            sink.send(Message::Text(frame))
                .await
                .context("websocket send failed")?;
            summary.sent += 1;

            let ack = next_reply(&mut stream).await?;
            match ack.get("error") {
                Some(err) => {
                    summary.rejected += 1;
                    tracing::warn!("{} rejected: {}", packet.bus_id, err);
                }
                None => {
                    summary.accepted += 1;
                    tracing::info!("sent {} at {:?}", packet.bus_id, packet.entry.timestamp);
                }
            }

            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }
    }

    if let Err(e) = sink.send(Message::Close(None)).await {
        tracing::debug!("close after replay failed: {}", e);
    }
    Ok(summary)
}

async fn next_reply<S>(stream: &mut S) -> Result<Value>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        match msg.context("websocket receive failed")? {
            Message::Text(text) => return serde_json::from_str(&text).context("ack is not JSON"),
            Message::Close(_) => break,
            _ => continue,
        }
    }
    bail!("server closed the stream before acknowledging")
}

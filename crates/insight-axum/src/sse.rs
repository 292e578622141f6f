//! SSE bridges for task event streams and TTS chunk streams.
//!
//! Each connection gets a pump task: bounded replay first, then live
//! events, with a typed heartbeat every 15 seconds while the stream is
//! idle. The pump ends after the terminal event, closing the stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, Sse};
use futures_util::stream::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use insight_core::{EventEnvelope, TaskEvent, TaskId};
use insight_sidecar::TtsEvent;
use insight_tasks::Subscription;

/// Heartbeat cadence on idle task streams.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Outbound buffer per SSE connection.
const CONNECTION_BUFFER: usize = 32;

/// Serialize an envelope as an SSE event, with the per-task `event_id` as
/// the SSE id so reconnecting clients can resume with `?since=`.
fn envelope_event(envelope: &EventEnvelope) -> Event {
    let event = Event::default()
        .event(envelope.event.event_name())
        .id(envelope.event_id.to_string());
    match serde_json::to_string(envelope) {
        Ok(json) => event.data(json),
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize event envelope");
            event.data("{}")
        }
    }
}

/// Stream a task's events: replay, then live, with heartbeats.
pub fn task_event_stream(
    task_id: TaskId,
    subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(CONNECTION_BUFFER);
    tokio::spawn(pump_task_events(task_id, subscription, tx));
    Sse::new(ReceiverStream::new(rx))
}

async fn pump_task_events(
    task_id: TaskId,
    subscription: Subscription,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    let Subscription { replay, mut live } = subscription;

    for envelope in replay {
        let terminal = envelope.event.is_terminal();
        if tx.send(Ok(envelope_event(&envelope))).await.is_err() {
            return;
        }
        if terminal {
            return;
        }
    }

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
        HEARTBEAT_INTERVAL,
    );
    loop {
        tokio::select! {
            maybe = live.recv() => {
                let Some(envelope) = maybe else { return };
                let terminal = envelope.event.is_terminal();
                if tx.send(Ok(envelope_event(&envelope))).await.is_err() {
                    return;
                }
                if terminal {
                    return;
                }
            }
            _ = heartbeat.tick() => {
                let envelope = EventEnvelope {
                    event_id: 0,
                    task_id: task_id.clone(),
                    event: TaskEvent::Heartbeat,
                };
                if tx.send(Ok(envelope_event(&envelope))).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Stream TTS chunk events until `complete` or `error`.
pub fn tts_event_stream(
    mut events: broadcast::Receiver<TtsEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(CONNECTION_BUFFER);
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "tts subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };
            let terminal = matches!(event, TtsEvent::Complete { .. } | TtsEvent::Error { .. });
            let sse_event = match serde_json::to_string(&event) {
                Ok(json) => Event::default().data(json),
                Err(_) => continue,
            };
            if tx.send(Ok(sse_event)).await.is_err() {
                return;
            }
            if terminal {
                return;
            }
        }
    });
    Sse::new(ReceiverStream::new(rx)).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("ping"),
    )
}

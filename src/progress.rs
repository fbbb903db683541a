//! Progress batching: coalesces the engine's fine-grained event
//! stream into frame-interval batches, discarding anything that
//! belongs to a superseded run.
//!
//! The engine can emit thousands of per-request events per second;
//! forwarding each one would overwhelm any consumer. Events are
//! buffered and flushed on a fixed ~16 ms cadence, and every flush
//! re-checks the run's generation so a consumer never observes
//! progress from a run that has been superseded, even while the
//! stale run's subscription is still winding down.

use crate::engine::{ProgressEvent, RequestEvent};
use crate::runner::RunHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// One flush interval's worth of events. `progress` is taken from
/// the last event in the batch.
#[derive(Debug, Clone)]
pub struct ProgressBatch {
    pub progress: f32,
    pub events: Vec<RequestEvent>,
}

/// Flush cadence, one rendering-frame equivalent.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(16);

/// Capacity of the engine-to-batcher event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Consume `events` until the sender side closes, delivering batches
/// to `sink` on the flush cadence.
///
/// Staleness is checked at flush time: if `handle` is no longer the
/// current generation the buffer is dropped silently and the task
/// ends. Within one generation, batch contents preserve arrival
/// order.
pub fn spawn_batcher(
    mut events: mpsc::Receiver<ProgressEvent>,
    handle: RunHandle,
    sink: mpsc::Sender<ProgressBatch>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut buffer: Vec<ProgressEvent> = Vec::new();

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Some(event) => buffer.push(event),
                    None => {
                        // Engine finished; flush whatever is left
                        // if the run is still live.
                        if handle.is_current() && !buffer.is_empty() {
                            let batch = drain_into_batch(&mut buffer);
                            let _ = sink.send(batch).await;
                        }
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if !handle.is_current() {
                        debug!(
                            generation = handle.generation(),
                            dropped = buffer.len(),
                            "run superseded; dropping buffered progress"
                        );
                        return;
                    }
                    if !buffer.is_empty() {
                        let batch = drain_into_batch(&mut buffer);
                        if sink.send(batch).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    })
}

fn drain_into_batch(buffer: &mut Vec<ProgressEvent>) -> ProgressBatch {
    let progress = buffer.last().map(|e| e.progress).unwrap_or(0.0);
    let events = buffer.drain(..).map(|e| e.result).collect();
    ProgressBatch { progress, events }
}

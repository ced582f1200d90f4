//! Async producer/consumer wiring for the viewer
//!
//! ```text
//! frames (mpsc) ──► demux task ──► watch mailbox ──► DisplayHandle
//!                       ▲                                 │
//!                       └──── enabled mask (watch) ◄──────┤
//!                       └──── BusyGate ◄──── done() ◄─────┘
//! ```
//!
//! The demux task never waits on the consumer: ready sets go through a
//! single-slot mailbox that keeps only the newest set.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::common::{ChannelMask, CounterSnapshot, DemuxCounters};
use crate::decoder::RawFrame;

use super::demux::{ChannelDemultiplexer, DemuxConfig, DemuxEvent, ReadyEvent};
use super::gate::BusyGate;

/// Consumer side of the viewer pipeline
pub struct DisplayHandle {
    ready_rx: watch::Receiver<Option<ReadyEvent>>,
    enabled_tx: watch::Sender<ChannelMask>,
    gate: BusyGate,
    counters: Arc<DemuxCounters>,
}

impl DisplayHandle {
    /// Wait for the next ready set
    ///
    /// Sets the consumer did not pick up in time are overwritten. Returns
    /// `None` once the producer has stopped and the last set was taken.
    pub async fn next(&mut self) -> Option<ReadyEvent> {
        loop {
            self.ready_rx.changed().await.ok()?;
            if let Some(event) = self.ready_rx.borrow_and_update().clone() {
                return Some(event);
            }
        }
    }

    /// Signal that the current set has been drawn
    pub fn done(&self) {
        self.gate.release();
    }

    /// Change which channels must arrive before the next set
    pub fn set_enabled(&self, mask: ChannelMask) {
        self.enabled_tx.send_replace(mask);
    }

    pub fn enabled(&self) -> ChannelMask {
        *self.enabled_tx.borrow()
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }
}

/// Spawn the demultiplexer task
///
/// The task runs until the frame channel closes or shutdown is signalled,
/// and returns the final counter values.
pub fn spawn_viewer(
    config: DemuxConfig,
    frames: mpsc::Receiver<RawFrame>,
    shutdown: broadcast::Receiver<()>,
) -> (JoinHandle<CounterSnapshot>, DisplayHandle) {
    let demux = ChannelDemultiplexer::new(config);
    let (ready_tx, ready_rx) = watch::channel(None);
    let (enabled_tx, enabled_rx) = watch::channel(config.enabled);

    let handle = DisplayHandle {
        ready_rx,
        enabled_tx,
        gate: demux.gate(),
        counters: demux.counters(),
    };

    let task = tokio::spawn(demux_task(demux, frames, enabled_rx, ready_tx, shutdown));
    (task, handle)
}

async fn demux_task(
    mut demux: ChannelDemultiplexer,
    mut frames: mpsc::Receiver<RawFrame>,
    mut enabled_rx: watch::Receiver<ChannelMask>,
    ready_tx: watch::Sender<Option<ReadyEvent>>,
    mut shutdown: broadcast::Receiver<()>,
) -> CounterSnapshot {
    let mut mask_open = true;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("Viewer received shutdown signal");
                break;
            }

            changed = enabled_rx.changed(), if mask_open => {
                match changed {
                    Ok(()) => {
                        let mask = *enabled_rx.borrow_and_update();
                        demux.set_enabled(mask);
                    }
                    Err(_) => mask_open = false,
                }
            }

            frame = frames.recv() => {
                let Some(frame) = frame else {
                    debug!("Frame channel closed");
                    break;
                };
                if let DemuxEvent::Ready(event) = demux.submit(frame) {
                    ready_tx.send_replace(Some(event));
                }
            }
        }
    }

    let stats = demux.counters().snapshot();
    info!(
        received = stats.received,
        ready = stats.ready,
        dropped = stats.dropped(),
        ignored = stats.ignored,
        truncated = stats.truncated,
        busy_timeouts = stats.busy_timeouts,
        clock_resets = stats.clock_resets,
        "Viewer stopped"
    );
    stats
}

//! Per-output write lanes
//!
//! Every output gets one bounded queue and one worker task. The worker runs
//! writes for its line strictly in arrival order, one at a time, so a slow
//! line never holds up the others and the last command queued is always the
//! last one applied. State reports go through the same queue, so a report
//! always reflects every write queued before it.

use super::Outbound;
use crate::drivers::OutputDriver;
use crate::error::DriverError;
use crate::pins::PhysicalId;
use crate::state::{Output, OutputState, StateStore};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// Work item for a lane
pub(crate) enum LaneCommand {
    /// Drive the line to `logical_on`
    Write {
        logical_on: bool,
        /// Completion signal for callers that wait on the write
        done: Option<oneshot::Sender<Result<(), DriverError>>>,
    },
    /// Emit the committed state without touching the line
    Report,
}

pub(crate) struct WriteLane {
    output: Output,
    pin: PhysicalId,
    driver: OutputDriver,
    store: StateStore,
    rx: mpsc::Receiver<LaneCommand>,
    events: mpsc::Sender<Outbound>,
}

impl WriteLane {
    /// Spawn the worker for `output` and return its queue
    pub fn spawn(
        output: Output,
        pin: PhysicalId,
        driver: OutputDriver,
        store: StateStore,
        events: mpsc::Sender<Outbound>,
        depth: usize,
    ) -> mpsc::Sender<LaneCommand> {
        let (tx, rx) = mpsc::channel(depth);
        let lane = WriteLane {
            output,
            pin,
            driver,
            store,
            rx,
            events,
        };
        tokio::spawn(lane.run());
        tx
    }

    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                LaneCommand::Write { logical_on, done } => {
                    let result = self.apply(logical_on).await;
                    if let Some(done) = done {
                        let _ = done.send(result);
                    }
                }
                LaneCommand::Report => self.report().await,
            }
        }
    }

    /// Write, then commit and announce on success
    async fn apply(&self, logical_on: bool) -> Result<(), DriverError> {
        if let Err(e) = self.driver.write(self.pin, logical_on).await {
            error!(
                "❌ {} write failed (requested {}), state left unchanged: {}",
                self.output,
                if logical_on { "ON" } else { "OFF" },
                e
            );
            self.emit(Outbound::Fault {
                output: self.output,
                requested: logical_on,
                error: e.to_string(),
            })
            .await;
            return Err(e);
        }

        match self.store.set(self.output, logical_on) {
            Ok(previous) => info!(
                "💡 {} LED {} - GPIO {} {}{}",
                self.output,
                if logical_on { "ON" } else { "OFF" },
                self.pin,
                if logical_on { "LOW" } else { "HIGH" },
                if previous == logical_on { " (re-asserted)" } else { "" }
            ),
            Err(e) => warn!("State slot missing after write: {}", e),
        }

        self.emit(Outbound::Status(OutputState {
            output: self.output,
            logical_on,
        }))
        .await;
        Ok(())
    }

    async fn report(&self) {
        match self.store.get(self.output) {
            Ok(logical_on) => {
                self.emit(Outbound::Status(OutputState {
                    output: self.output,
                    logical_on,
                }))
                .await
            }
            Err(e) => warn!("State slot missing on report: {}", e),
        }
    }

    async fn emit(&self, event: Outbound) {
        if self.events.send(event).await.is_err() {
            warn!("Outbound channel closed, dropping event for {}", self.output);
        }
    }
}

//! Command handling, state replay and bulk writes

use super::command::InboundCommand;
use super::lane::LaneCommand;
use crate::error::{NotFound, RouterError};
use crate::state::Output;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

impl super::CommandRouter {
    /// Handle one raw bus message
    ///
    /// Parses and resolves the command, then queues it on the output's lane.
    /// Returns once the command is queued; the write and the status event
    /// follow asynchronously. Rejected commands are logged and dropped.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<Output, RouterError> {
        debug!(
            "📥 Received: {} = '{}'",
            topic,
            String::from_utf8_lossy(payload).trim()
        );

        let result = self.route(topic, payload).await;
        if let Err(e) = &result {
            warn!("Dropped command on '{}': {}", topic, e);
        }
        result
    }

    async fn route(&self, topic: &str, payload: &[u8]) -> Result<Output, RouterError> {
        if !self.is_accepting() {
            return Err(RouterError::ShuttingDown);
        }

        let cmd = InboundCommand::parse(topic, payload)?;
        let (output, _pin) = self.registry.resolve(&cmd.device, &cmd.name)?;

        self.enqueue(
            output,
            LaneCommand::Write {
                logical_on: cmd.logical_on,
                done: None,
            },
        )
        .await?;
        Ok(output)
    }

    /// Write `logical_on` to `output` and wait for the outcome
    ///
    /// Goes through the output's lane, so it is ordered after anything
    /// already queued for that output.
    pub async fn apply(&self, output: Output, logical_on: bool) -> Result<(), RouterError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(
            output,
            LaneCommand::Write {
                logical_on,
                done: Some(done_tx),
            },
        )
        .await?;

        match done_rx.await {
            Ok(result) => result.map_err(RouterError::from),
            Err(_) => Err(RouterError::LaneClosed(output)),
        }
    }

    async fn enqueue(&self, output: Output, cmd: LaneCommand) -> Result<(), RouterError> {
        let lane = self
            .lanes
            .get(&output)
            .ok_or_else(|| NotFound::from(output))?;

        lane.send(cmd)
            .await
            .map_err(|_| RouterError::LaneClosed(output))
    }

    /// Queue one status report per output
    ///
    /// Called on every (re)connection so observers converge without replay.
    /// Each report is ordered behind the writes already queued for its
    /// output, so it carries the state those writes leave behind.
    pub async fn republish_all(&self) -> usize {
        let outputs: Vec<Output> = self.registry.outputs().collect();
        let mut queued = 0;

        for output in outputs {
            match self.enqueue(output, LaneCommand::Report).await {
                Ok(()) => queued += 1,
                Err(e) => warn!("State report for {} not queued: {}", output, e),
            }
        }

        info!("📤 Republishing state of {} outputs", queued);
        queued
    }

    /// Write the same state to every output, collecting failures
    pub async fn drive_all(&self, logical_on: bool) -> Vec<(Output, RouterError)> {
        let mut failures = Vec::new();
        let outputs: Vec<Output> = self.registry.outputs().collect();

        for output in outputs {
            if let Err(e) = self.apply(output, logical_on).await {
                failures.push((output, e));
            }
        }
        failures
    }

    /// Light each LED in turn, device by device
    pub async fn lamp_test(&self, on_time: Duration, off_time: Duration) {
        info!("Testing all individual LEDs...");

        let outputs: Vec<Output> = self.registry.outputs().collect();
        for output in outputs {
            if let Err(e) = self.apply(output, true).await {
                warn!("Lamp test: {} could not be lit: {}", output, e);
                continue;
            }
            tokio::time::sleep(on_time).await;

            if let Err(e) = self.apply(output, false).await {
                warn!("Lamp test: {} could not be turned off: {}", output, e);
            }
            tokio::time::sleep(off_time).await;
        }

        info!("LED test complete");
    }

    /// Refuse further bus commands; writes already queued still complete
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }
}

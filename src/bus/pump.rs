//! Outbound pump - forwards router events to the broker
//!
//! Events are only published while the bus is `Connected`. Anything offered
//! while the link is down is dropped; the full republish after the next
//! subscription supersedes it. When the client's request queue is full the
//! latest event per topic is held and retried, so a busy link delays status
//! updates instead of losing them.

use super::BusState;
use crate::router::Outbound;
use rumqttc::{AsyncClient, QoS};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// How often held events are retried
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Sink for outbound events; implemented by the MQTT client
pub trait Publisher: Send + 'static {
    /// Queue one message without waiting; fails when the queue is full
    fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), String>;
}

impl Publisher for AsyncClient {
    fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), String> {
        self.try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| e.to_string())
    }
}

/// Whether an event should go out given the current link state
pub fn should_publish(state: BusState, event: &Outbound, publish_errors: bool) -> bool {
    if state != BusState::Connected {
        return false;
    }
    match event {
        Outbound::Status(_) => true,
        Outbound::Fault { .. } => publish_errors,
    }
}

pub struct OutboundPump<P> {
    publisher: P,
    publish_errors: bool,
    /// Events waiting for room in the request queue, latest per topic
    held: BTreeMap<String, Outbound>,
}

impl<P: Publisher> OutboundPump<P> {
    pub fn new(publisher: P, publish_errors: bool) -> Self {
        Self {
            publisher,
            publish_errors,
            held: BTreeMap::new(),
        }
    }

    /// Publish `event`, or hold it if the request queue is full
    pub fn offer(&mut self, state: BusState, event: Outbound) {
        if !should_publish(state, &event, self.publish_errors) {
            debug!("Not publishing {} (bus {:?})", event.topic(), state);
            if state != BusState::Connected {
                self.held.clear();
            }
            return;
        }

        let was_holding = !self.held.is_empty();
        self.held.insert(event.topic(), event);
        self.flush();

        if !was_holding && !self.held.is_empty() {
            warn!(
                "MQTT request queue full, holding {} event(s) for retry",
                self.held.len()
            );
        }
    }

    /// Retry held events; discards them once the link is down
    pub fn retry(&mut self, state: BusState) {
        if state != BusState::Connected {
            if !self.held.is_empty() {
                debug!("Bus {:?}, discarding {} held event(s)", state, self.held.len());
                self.held.clear();
            }
            return;
        }
        self.flush();
    }

    /// Number of events waiting for room in the request queue
    pub fn held(&self) -> usize {
        self.held.len()
    }

    fn flush(&mut self) {
        while let Some(entry) = self.held.first_entry() {
            let topic = entry.key().clone();
            let payload = entry.get().payload();

            match self.publisher.publish(topic.clone(), payload.clone()) {
                Ok(()) => {
                    debug!("📤 {} = {}", topic, String::from_utf8_lossy(&payload));
                    entry.remove();
                }
                Err(e) => {
                    debug!("Publish of {} deferred: {}", topic, e);
                    break;
                }
            }
        }
    }
}

/// Forward router events to the bus while connected
pub fn spawn_outbound_pump<P: Publisher>(
    publisher: P,
    mut state: watch::Receiver<BusState>,
    mut events: mpsc::Receiver<Outbound>,
    publish_errors: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pump = OutboundPump::new(publisher, publish_errors);
        let mut retry = tokio::time::interval(RETRY_INTERVAL);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        let current = *state.borrow_and_update();
                        pump.offer(current, event);
                    }
                    None => break,
                },
                _ = retry.tick(), if pump.held() > 0 => {
                    let current = *state.borrow_and_update();
                    pump.retry(current);
                }
            }
        }
        debug!("Outbound pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DeviceId, Output, OutputName, OutputState};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Records publishes; refuses once `room` messages are queued
    #[derive(Clone)]
    struct QueuePublisher {
        sent: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        room: Arc<Mutex<usize>>,
    }

    impl QueuePublisher {
        fn with_room(room: usize) -> Self {
            Self {
                sent: Arc::default(),
                room: Arc::new(Mutex::new(room)),
            }
        }

        fn make_room(&self, room: usize) {
            *self.room.lock() = room;
        }

        fn sent(&self) -> Vec<(String, Vec<u8>)> {
            self.sent.lock().clone()
        }
    }

    impl Publisher for QueuePublisher {
        fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), String> {
            let mut room = self.room.lock();
            if *room == 0 {
                return Err("request queue full".to_string());
            }
            *room -= 1;
            self.sent.lock().push((topic, payload));
            Ok(())
        }
    }

    fn status(output: Output, on: bool) -> Outbound {
        Outbound::Status(OutputState {
            output,
            logical_on: on,
        })
    }

    fn fault() -> Outbound {
        Outbound::Fault {
            output: Output::new(DeviceId::Fpga1, OutputName::Secondary),
            requested: true,
            error: "GPIO 19 unavailable".to_string(),
        }
    }

    #[test]
    fn test_should_publish() {
        let dan = Output::new(DeviceId::Fpga1, OutputName::Primary);
        assert!(should_publish(BusState::Connected, &status(dan, true), false));
        assert!(!should_publish(BusState::Connecting, &status(dan, true), false));
        assert!(!should_publish(BusState::Disconnected, &status(dan, true), false));
        assert!(!should_publish(BusState::Connected, &fault(), false));
        assert!(should_publish(BusState::Connected, &fault(), true));
    }

    #[test]
    fn test_full_queue_holds_latest_status_per_output() {
        let publisher = QueuePublisher::with_room(2);
        let mut pump = OutboundPump::new(publisher.clone(), false);
        let outputs: Vec<Output> = Output::all().take(5).collect();

        for output in &outputs {
            pump.offer(BusState::Connected, status(*output, true));
        }
        assert_eq!(publisher.sent().len(), 2);
        assert_eq!(pump.held(), 3);

        // A newer state for a held output replaces the older one
        pump.offer(BusState::Connected, status(outputs[4], false));
        assert_eq!(pump.held(), 3);

        publisher.make_room(16);
        pump.retry(BusState::Connected);
        assert_eq!(pump.held(), 0);

        let sent = publisher.sent();
        assert_eq!(sent.len(), 5);
        let last = sent
            .iter()
            .find(|(topic, _)| *topic == "fpga/status/fpga2/dan")
            .unwrap();
        assert_eq!(last.1, b"false".to_vec());
    }

    #[test]
    fn test_held_events_discarded_when_link_drops() {
        let publisher = QueuePublisher::with_room(0);
        let mut pump = OutboundPump::new(publisher.clone(), false);
        let dan = Output::new(DeviceId::Fpga1, OutputName::Primary);

        pump.offer(BusState::Connected, status(dan, true));
        assert_eq!(pump.held(), 1);

        pump.retry(BusState::Disconnected);
        assert_eq!(pump.held(), 0);

        publisher.make_room(4);
        pump.retry(BusState::Connected);
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_pump_drops_while_disconnected() {
        let publisher = QueuePublisher::with_room(16);
        let (state_tx, state_rx) = watch::channel(BusState::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(8);
        let pump = spawn_outbound_pump(publisher.clone(), state_rx, events_rx, false);
        let dan = Output::new(DeviceId::Fpga1, OutputName::Primary);

        events_tx.send(status(dan, true)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(publisher.sent().is_empty());

        state_tx.send(BusState::Connected).unwrap();
        events_tx.send(status(dan, false)).await.unwrap();
        events_tx.send(fault()).await.unwrap();
        drop(events_tx);
        pump.await.unwrap();

        assert_eq!(
            publisher.sent(),
            vec![("fpga/status/fpga1/dan".to_string(), b"false".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_pump_retries_until_queue_drains() {
        let publisher = QueuePublisher::with_room(1);
        let (_state_tx, state_rx) = watch::channel(BusState::Connected);
        let (events_tx, events_rx) = mpsc::channel(8);
        let pump = spawn_outbound_pump(publisher.clone(), state_rx, events_rx, false);

        for output in Output::all().take(4) {
            events_tx.send(status(output, true)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(publisher.sent().len(), 1);

        publisher.make_room(16);
        tokio::time::sleep(RETRY_INTERVAL * 3).await;
        assert_eq!(publisher.sent().len(), 4);

        drop(events_tx);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_pump_publishes_faults_when_enabled() {
        let publisher = QueuePublisher::with_room(16);
        let (_state_tx, state_rx) = watch::channel(BusState::Connected);
        let (events_tx, events_rx) = mpsc::channel(8);
        let pump = spawn_outbound_pump(publisher.clone(), state_rx, events_rx, true);

        events_tx.send(fault()).await.unwrap();
        drop(events_tx);
        pump.await.unwrap();

        let sent = publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "fpga/error/fpga1/nate");
        let body: serde_json::Value = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(body["requested"], true);
        assert_eq!(body["error"], "GPIO 19 unavailable");
    }
}

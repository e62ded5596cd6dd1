//! MQTT bus connection management
//!
//! Owns the broker connection: connect, subscribe, dispatch commands to the
//! router, reconnect with backoff, and publish router events while the link
//! is up. Publishes requested while the link is down are dropped; the full
//! state replay after the next subscription supersedes them.

mod backoff;
mod pump;
mod session;


pub use backoff::{Backoff, DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY, MIN_DELAY_FLOOR};
pub use pump::{should_publish, spawn_outbound_pump, OutboundPump, Publisher, RETRY_INTERVAL};
pub use session::{BusSession, BusSignal, BusState, SessionAction};

use crate::error::ConnectionError;
use crate::router::{CommandRouter, Outbound, COMMAND_FILTER};
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, NetworkOptions, Outgoing, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the client's request queue
const REQUEST_CAPACITY: usize = 64;

/// Router work buffered between the event loop and the router task
const ROUTER_QUEUE_CAPACITY: usize = 64;

/// Time allowed for the DISCONNECT to go out on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Connection parameters
#[derive(Debug, Clone)]
pub struct BusOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    /// Also publish failed writes on `fpga/error/...`
    pub publish_errors: bool,
    pub min_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "fpga-led-gw".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            publish_errors: false,
            min_reconnect_delay: DEFAULT_MIN_DELAY,
            max_reconnect_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Work the event loop hands to the router task, processed in order
#[derive(Debug)]
enum RouterRequest {
    Dispatch { topic: String, payload: Bytes },
    Republish,
}

/// Run router work off the event loop so polling never waits on a GPIO lane
fn spawn_router_task(
    router: Arc<CommandRouter>,
    mut requests: mpsc::Receiver<RouterRequest>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            match request {
                RouterRequest::Dispatch { topic, payload } => {
                    // Errors are logged by the router; the command is simply dropped
                    let _ = router.handle_message(&topic, &payload).await;
                }
                RouterRequest::Republish => {
                    router.republish_all().await;
                }
            }
        }
        debug!("Router task stopped");
    })
}

/// Control handle for a running `BusConnectionManager`
#[derive(Clone)]
pub struct BusHandle {
    shutdown: watch::Sender<bool>,
}

impl BusHandle {
    /// Ask the manager to disconnect cleanly and stop
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Drives the MQTT event loop and the connection state machine
pub struct BusConnectionManager {
    client: AsyncClient,
    eventloop: EventLoop,
    session: BusSession,
    router_tx: mpsc::Sender<RouterRequest>,
    state_tx: watch::Sender<BusState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BusConnectionManager {
    /// Create the client, start the outbound pump and router task, and
    /// return the manager
    ///
    /// Nothing touches the network until `run` is awaited.
    pub fn new(
        options: &BusOptions,
        router: Arc<CommandRouter>,
        events: mpsc::Receiver<Outbound>,
    ) -> (Self, BusHandle) {
        let mut mqtt = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt.set_keep_alive(options.keep_alive.max(Duration::from_secs(5)));
        mqtt.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(mqtt, REQUEST_CAPACITY);

        let mut network = NetworkOptions::new();
        network.set_connection_timeout(options.connect_timeout.as_secs().max(1));
        eventloop.set_network_options(network);

        let (state_tx, state_rx) = watch::channel(BusState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        spawn_outbound_pump(client.clone(), state_rx, events, options.publish_errors);

        let (router_tx, router_rx) = mpsc::channel(ROUTER_QUEUE_CAPACITY);
        spawn_router_task(router, router_rx);

        let backoff = Backoff::new(options.min_reconnect_delay, options.max_reconnect_delay);
        let manager = Self {
            client,
            eventloop,
            session: BusSession::new(backoff),
            router_tx,
            state_tx,
            shutdown_rx,
        };
        let handle = BusHandle {
            shutdown: shutdown_tx,
        };
        (manager, handle)
    }

    /// Run until shutdown is requested; connection errors never end the loop
    pub async fn run(mut self) {
        info!("Starting MQTT event loop...");
        self.session.begin_connect();
        self.publish_state();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    self.disconnect().await;
                    break;
                }

                polled = self.eventloop.poll() => {
                    let signal = match polled {
                        Ok(event) => BusSignal::from_event(event),
                        Err(e) => {
                            let e = ConnectionError::from(e);
                            Some(BusSignal::Lost(e.to_string()))
                        }
                    };

                    if let Some(signal) = signal {
                        let action = self.session.on_signal(signal);
                        self.publish_state();
                        if let Some(action) = action {
                            if !self.perform(action).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.session_closed();
        info!("MQTT event loop stopped");
    }

    /// Carry out a session action; false when shutdown arrived meanwhile
    async fn perform(&mut self, action: SessionAction) -> bool {
        match action {
            SessionAction::Subscribe => {
                if let Err(e) = self.subscribe() {
                    error!("{}", e);
                }
            }
            SessionAction::RetrySubscribe(delay) => {
                if !self.pause(delay).await {
                    return false;
                }
                if let Err(e) = self.subscribe() {
                    error!("{}", e);
                }
            }
            SessionAction::Republish => {
                self.forward(RouterRequest::Republish).await;
            }
            SessionAction::Dispatch { topic, payload } => {
                self.forward(RouterRequest::Dispatch { topic, payload }).await;
            }
            SessionAction::Backoff(delay) => {
                info!(
                    "⏳ MQTT reconnect #{} in {:?}",
                    self.session.failed_attempts(),
                    delay
                );
                if !self.pause(delay).await {
                    return false;
                }
                self.session.begin_connect();
                self.publish_state();
            }
        }
        true
    }

    /// Hand work to the router task; waits only while its queue is full
    async fn forward(&mut self, request: RouterRequest) {
        if self.router_tx.send(request).await.is_err() {
            error!("Router task is gone, bus message dropped");
        }
    }

    fn subscribe(&self) -> Result<(), ConnectionError> {
        debug!("Subscribing to {}", COMMAND_FILTER);
        self.client.try_subscribe(COMMAND_FILTER, QoS::AtLeastOnce)?;
        Ok(())
    }

    /// Sleep unless shutdown is requested first
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown_rx.changed() => {
                self.disconnect().await;
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn disconnect(&mut self) {
        if self.session.state() != BusState::Connected {
            return;
        }

        info!("Disconnecting from MQTT broker...");
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to queue DISCONNECT: {}", e);
            return;
        }

        // Keep polling so queued publishes and the DISCONNECT are flushed
        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, flush).await.is_err() {
            warn!("Timed out waiting for MQTT disconnect");
        }
    }

    fn session_closed(&self) {
        let _ = self.state_tx.send(BusState::Disconnected);
    }

    fn publish_state(&self) {
        let state = self.session.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

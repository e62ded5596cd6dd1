//! Bus connection state machine
//!
//! ```text
//! Disconnected --begin_connect--> Connecting --ConnAck ok--> (subscribe)
//!      ^                              |                          |
//!      |                              | refused / error          | SubAck ok
//!      +------------- backoff <-------+<----- error ------- Connected
//! ```
//!
//! Pure: it consumes `BusSignal`s and returns the action the event loop must
//! perform. State is only `Connected` once the command subscription has been
//! acknowledged. Commands are dispatched as soon as the subscription has been
//! requested on the current connection: a broker may deliver matching
//! messages before its SUBACK.

use super::backoff::Backoff;
use crate::error::ConnectionError;
use crate::router::COMMAND_FILTER;
use bytes::Bytes;
use rumqttc::{ConnectReturnCode, Event, Packet, SubscribeReasonCode};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Disconnected,
    Connecting,
    Connected,
}

/// Protocol-level happenings the session reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusSignal {
    ConnAck { accepted: bool, reason: String },
    SubAck { granted: bool },
    Message { topic: String, payload: Bytes },
    Lost(String),
}

impl BusSignal {
    /// Extract the signal carried by a client event, if any
    pub fn from_event(event: Event) -> Option<Self> {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => Some(BusSignal::ConnAck {
                accepted: ack.code == ConnectReturnCode::Success,
                reason: format!("{:?}", ack.code),
            }),
            Event::Incoming(Packet::SubAck(ack)) => Some(BusSignal::SubAck {
                granted: !ack.return_codes.is_empty()
                    && ack
                        .return_codes
                        .iter()
                        .all(|code| matches!(code, SubscribeReasonCode::Success(_))),
            }),
            Event::Incoming(Packet::Publish(publish)) => Some(BusSignal::Message {
                topic: publish.topic,
                payload: publish.payload,
            }),
            Event::Incoming(Packet::Disconnect) => {
                Some(BusSignal::Lost("broker sent DISCONNECT".to_string()))
            }
            _ => None,
        }
    }
}

/// What the event loop must do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Issue the command subscription
    Subscribe,
    /// Subscription was refused; wait, then subscribe again
    RetrySubscribe(Duration),
    /// Subscription acknowledged; replay the full state
    Republish,
    /// Hand a command to the router
    Dispatch { topic: String, payload: Bytes },
    /// Connection is gone; wait before the next attempt
    Backoff(Duration),
}

pub struct BusSession {
    state: BusState,
    backoff: Backoff,
    /// SUBSCRIBE issued on the current connection
    subscribe_sent: bool,
}

impl BusSession {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: BusState::Disconnected,
            backoff,
            subscribe_sent: false,
        }
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    /// Failed attempts since the last successful subscription
    pub fn failed_attempts(&self) -> u32 {
        self.backoff.attempt()
    }

    /// A connection attempt is starting
    pub fn begin_connect(&mut self) {
        if self.state == BusState::Disconnected {
            debug!("Bus: Disconnected -> Connecting");
            self.state = BusState::Connecting;
        }
    }

    pub fn on_signal(&mut self, signal: BusSignal) -> Option<SessionAction> {
        match signal {
            BusSignal::ConnAck { accepted: true, .. } => {
                info!("🔌 Connected to MQTT broker, subscribing...");
                self.state = BusState::Connecting;
                self.subscribe_sent = true;
                Some(SessionAction::Subscribe)
            }
            BusSignal::ConnAck { accepted: false, reason } => {
                warn!("{}", ConnectionError::Refused(reason));
                Some(self.lose())
            }
            BusSignal::SubAck { granted: true } => {
                if self.state == BusState::Connected {
                    // Replayed subscription after reconnect; state already announced
                    debug!("Duplicate SUBACK ignored");
                    return None;
                }
                info!("✅ Subscribed, bus connected");
                self.state = BusState::Connected;
                self.backoff.reset();
                Some(SessionAction::Republish)
            }
            BusSignal::SubAck { granted: false } => {
                let delay = self.backoff.next_delay();
                warn!(
                    "{}, retrying in {:?}",
                    ConnectionError::SubscribeRejected(COMMAND_FILTER.to_string()),
                    delay
                );
                Some(SessionAction::RetrySubscribe(delay))
            }
            BusSignal::Message { topic, payload } => {
                if !self.subscribe_sent {
                    warn!("Message on '{}' before subscribing, dropped", topic);
                    return None;
                }
                Some(SessionAction::Dispatch { topic, payload })
            }
            BusSignal::Lost(reason) => {
                warn!("🔌 MQTT connection lost: {}", reason);
                Some(self.lose())
            }
        }
    }

    fn lose(&mut self) -> SessionAction {
        self.state = BusState::Disconnected;
        self.subscribe_sent = false;
        let delay = self.backoff.next_delay();
        debug!(
            "Bus: -> Disconnected, reconnect #{} in {:?}",
            self.backoff.attempt(),
            delay
        );
        SessionAction::Backoff(delay)
    }
}

//! Intent commands for downstream consumers
//!
//! The consensus output is collapsed into one of three commands. On the wire
//! (UDP datagram, plain ASCII) they read `MOVE_LEFT:0.87`, `MOVE_RIGHT:0.91`
//! and `NONE`. The same consumer also receives `trigger_left` and
//! `trigger_right` stimulus cues for manual markers.

use super::classifier::ClassLabel;
use crate::marker::MarkerTrigger;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Repeats of the same trigger within this window are dropped
pub const TRIGGER_DEBOUNCE: Duration = Duration::from_millis(200);

/// Discrete command derived from consensus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum IntentCommand {
    #[serde(rename = "MOVE_LEFT")]
    MoveLeft { confidence: f64 },
    #[serde(rename = "MOVE_RIGHT")]
    MoveRight { confidence: f64 },
    #[serde(rename = "NONE")]
    NoIntent,
}

impl IntentCommand {
    /// Map a consensus result; `None` and the `none` label mean no intent
    pub fn from_consensus(consensus: Option<(ClassLabel, f64)>) -> Self {
        match consensus {
            Some((ClassLabel::Left, confidence)) => IntentCommand::MoveLeft { confidence },
            Some((ClassLabel::Right, confidence)) => IntentCommand::MoveRight { confidence },
            Some((ClassLabel::None, _)) | None => IntentCommand::NoIntent,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        match *self {
            IntentCommand::MoveLeft { confidence } | IntentCommand::MoveRight { confidence } => {
                Some(confidence)
            }
            IntentCommand::NoIntent => None,
        }
    }

    pub fn is_intent(&self) -> bool {
        !matches!(self, IntentCommand::NoIntent)
    }
}

impl fmt::Display for IntentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentCommand::MoveLeft { confidence } => write!(f, "MOVE_LEFT:{confidence:.2}"),
            IntentCommand::MoveRight { confidence } => write!(f, "MOVE_RIGHT:{confidence:.2}"),
            IntentCommand::NoIntent => f.write_str("NONE"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("invalid target address: {0}")]
    InvalidAddress(String),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sends intent changes and marker triggers to a UDP consumer (game, actuator)
pub struct IntentForwarder {
    socket: UdpSocket,
    target: SocketAddr,
    last_sent: Option<String>,
    triggers_sent: HashMap<MarkerTrigger, Instant>,
}

impl IntentForwarder {
    pub fn new(target: &str) -> Result<Self, ForwardError> {
        let target: SocketAddr = target
            .parse()
            .map_err(|_| ForwardError::InvalidAddress(target.to_string()))?;
        let bind = if target.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind)?;
        Ok(Self {
            socket,
            target,
            last_sent: None,
            triggers_sent: HashMap::new(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send `command` if its wire form differs from the last one sent
    ///
    /// Returns true when a datagram went out.
    pub fn forward(&mut self, command: &IntentCommand) -> Result<bool, ForwardError> {
        let wire = command.to_string();
        if self.last_sent.as_deref() == Some(wire.as_str()) {
            return Ok(false);
        }
        self.socket.send_to(wire.as_bytes(), self.target)?;
        tracing::debug!(command = %wire, addr = %self.target, "Intent forwarded");
        self.last_sent = Some(wire);
        Ok(true)
    }

    /// Send a stimulus cue unless the same one went out within [`TRIGGER_DEBOUNCE`]
    pub fn send_trigger(&mut self, trigger: MarkerTrigger) -> Result<bool, ForwardError> {
        self.send_trigger_at(trigger, Instant::now())
    }

    fn send_trigger_at(&mut self, trigger: MarkerTrigger, now: Instant) -> Result<bool, ForwardError> {
        if let Some(last) = self.triggers_sent.get(&trigger) {
            if now.saturating_duration_since(*last) < TRIGGER_DEBOUNCE {
                tracing::debug!(%trigger, "Duplicate trigger skipped");
                return Ok(false);
            }
        }
        self.socket.send_to(trigger.wire().as_bytes(), self.target)?;
        tracing::debug!(%trigger, addr = %self.target, "Trigger forwarded");
        self.triggers_sent.insert(trigger, now);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(
            IntentCommand::MoveLeft { confidence: 0.8712 }.to_string(),
            "MOVE_LEFT:0.87"
        );
        assert_eq!(
            IntentCommand::MoveRight { confidence: 0.91 }.to_string(),
            "MOVE_RIGHT:0.91"
        );
        assert_eq!(IntentCommand::NoIntent.to_string(), "NONE");
    }

    #[test]
    fn test_from_consensus() {
        assert_eq!(
            IntentCommand::from_consensus(Some((ClassLabel::Right, 0.7))),
            IntentCommand::MoveRight { confidence: 0.7 }
        );
        assert_eq!(
            IntentCommand::from_consensus(Some((ClassLabel::None, 0.99))),
            IntentCommand::NoIntent
        );
        assert_eq!(IntentCommand::from_consensus(None), IntentCommand::NoIntent);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(IntentCommand::MoveLeft { confidence: 0.5 }).unwrap();
        assert_eq!(json["command"], "MOVE_LEFT");
        assert_eq!(json["confidence"], 0.5);
        let none = serde_json::to_value(IntentCommand::NoIntent).unwrap();
        assert_eq!(none["command"], "NONE");
    }

    #[test]
    fn test_forwarder_sends_only_changes() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let target = receiver.local_addr().unwrap().to_string();
        let mut forwarder = IntentForwarder::new(&target).unwrap();

        let left = IntentCommand::MoveLeft { confidence: 0.9 };
        assert!(forwarder.forward(&left).unwrap());
        assert!(!forwarder.forward(&left).unwrap());
        assert!(forwarder.forward(&IntentCommand::NoIntent).unwrap());

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"MOVE_LEFT:0.90");
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"NONE");
    }

    #[test]
    fn test_triggers_debounced_per_side() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let target = receiver.local_addr().unwrap().to_string();
        let mut forwarder = IntentForwarder::new(&target).unwrap();

        let t0 = Instant::now();
        assert!(forwarder.send_trigger_at(MarkerTrigger::Left, t0).unwrap());
        assert!(!forwarder
            .send_trigger_at(MarkerTrigger::Left, t0 + Duration::from_millis(50))
            .unwrap());
        assert!(forwarder
            .send_trigger_at(MarkerTrigger::Right, t0 + Duration::from_millis(60))
            .unwrap());
        assert!(forwarder
            .send_trigger_at(MarkerTrigger::Left, t0 + TRIGGER_DEBOUNCE)
            .unwrap());

        let mut buf = [0u8; 64];
        for expected in [&b"trigger_left"[..], b"trigger_right", b"trigger_left"] {
            let n = receiver.recv(&mut buf).unwrap();
            assert_eq!(&buf[..n], expected);
        }
    }

    #[test]
    fn test_invalid_target() {
        assert!(matches!(
            IntentForwarder::new("nowhere"),
            Err(ForwardError::InvalidAddress(_))
        ));
    }
}

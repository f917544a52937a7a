//! UDP datagram source
//!
//! Each datagram carries exactly one sample. Accepted payloads:
//! - JSON array of at least N numbers (extra trailing values ignored)
//! - JSON object with `Ch1`..`ChN` keys (scalar, or list whose last value is used)
//! - JSON object `{"channels": ...}` wrapping either of the above
//! - exactly `N * 4` bytes of little-endian `f32`
//!
//! Anything else is dropped and counted. There is no acknowledgement or
//! retransmission.

use super::{DropCounter, Sample, SampleSource, SourceError};
use serde_json::Value;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use thiserror::Error;

/// Read timeout so the dispatch worker can check its stop flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 65536;

/// Reasons a datagram is rejected
#[derive(Error, Debug, PartialEq)]
pub enum PacketError {
    #[error("payload is neither JSON nor {expected_bytes} bytes of f32")]
    UnknownEncoding { expected_bytes: usize },

    #[error("expected {expected} channels, got {got}")]
    WrongArity { expected: usize, got: usize },

    #[error("channel {0} is not numeric")]
    NonNumeric(usize),

    #[error("channel {0} is not finite")]
    NonFinite(usize),

    #[error("unrecognised JSON layout")]
    UnknownLayout,
}

/// Network sample source bound to a UDP endpoint
pub struct UdpSource {
    socket: UdpSocket,
    channel_count: usize,
    sample_rate: u32,
    buffer: Vec<u8>,
    dropped: DropCounter,
    received: u64,
}

impl UdpSource {
    /// Bind synchronously
    pub fn bind(addr: &str, channel_count: usize, sample_rate: u32) -> Result<Self, SourceError> {
        let socket = UdpSocket::bind(addr).map_err(|source| SourceError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Self::from_socket(socket, channel_count, sample_rate)
    }

    /// Bind on a helper thread, giving up after `timeout`
    ///
    /// Address resolution may block; the helper thread is abandoned on timeout.
    pub fn bind_with_timeout(
        addr: &str,
        channel_count: usize,
        sample_rate: u32,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let target = addr.to_string();
        std::thread::Builder::new()
            .name("udp-bind".into())
            .spawn(move || {
                let _ = tx.send(UdpSocket::bind(target.as_str()));
            })?;

        match rx.recv_timeout(timeout) {
            Ok(Ok(socket)) => Self::from_socket(socket, channel_count, sample_rate),
            Ok(Err(source)) => Err(SourceError::Bind {
                addr: addr.to_string(),
                source,
            }),
            Err(_) => Err(SourceError::BindTimeout(addr.to_string())),
        }
    }

    fn from_socket(
        socket: UdpSocket,
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<Self, SourceError> {
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        if let Ok(local) = socket.local_addr() {
            tracing::info!(%local, channel_count, "UDP receiver bound");
        }
        Ok(Self {
            socket,
            channel_count,
            sample_rate,
            buffer: vec![0u8; MAX_DATAGRAM],
            dropped: DropCounter::new(),
            received: 0,
        })
    }

    /// Actual bound address (useful with port 0)
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Datagrams decoded successfully
    pub fn packets_received(&self) -> u64 {
        self.received
    }
}

impl SampleSource for UdpSource {
    fn produce(&mut self) -> Option<Sample> {
        match self.socket.recv_from(&mut self.buffer) {
            Ok((len, from)) => match decode_packet(&self.buffer[..len], self.channel_count) {
                Ok(channels) => {
                    self.received += 1;
                    Some(Sample::new(channels, false))
                }
                Err(e) => {
                    self.dropped.increment();
                    tracing::debug!(%from, len, error = %e, "Dropped malformed packet");
                    None
                }
            },
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => None,
            Err(e) => {
                tracing::debug!(error = %e, "UDP receive failed");
                None
            }
        }
    }

    fn is_simulated(&self) -> bool {
        false
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn drop_counter(&self) -> DropCounter {
        self.dropped.clone()
    }
}

/// Decode one datagram into exactly `channel_count` readings
pub fn decode_packet(payload: &[u8], channel_count: usize) -> Result<Vec<f64>, PacketError> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(value) => decode_json(&value, channel_count, true),
        Err(_) if payload.len() == channel_count * 4 => decode_f32_le(payload),
        Err(_) => Err(PacketError::UnknownEncoding {
            expected_bytes: channel_count * 4,
        }),
    }
}

fn decode_f32_le(payload: &[u8]) -> Result<Vec<f64>, PacketError> {
    payload
        .chunks_exact(4)
        .enumerate()
        .map(|(i, chunk)| {
            let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if value.is_finite() {
                Ok(f64::from(value))
            } else {
                Err(PacketError::NonFinite(i))
            }
        })
        .collect()
}

fn decode_json(value: &Value, channel_count: usize, allow_nested: bool) -> Result<Vec<f64>, PacketError> {
    match value {
        Value::Array(items) => {
            if items.len() < channel_count {
                return Err(PacketError::WrongArity {
                    expected: channel_count,
                    got: items.len(),
                });
            }
            items[..channel_count]
                .iter()
                .enumerate()
                .map(|(i, v)| v.as_f64().ok_or(PacketError::NonNumeric(i)))
                .collect()
        }
        Value::Object(map) if map.contains_key("Ch1") => (1..=channel_count)
            .map(|ch| match map.get(&format!("Ch{ch}")) {
                None | Some(Value::Null) => Ok(0.0),
                Some(Value::Array(history)) => history
                    .last()
                    .and_then(Value::as_f64)
                    .ok_or(PacketError::NonNumeric(ch - 1)),
                Some(v) => v.as_f64().ok_or(PacketError::NonNumeric(ch - 1)),
            })
            .collect(),
        Value::Object(map) if allow_nested => match map.get("channels") {
            Some(inner) => decode_json(inner, channel_count, false),
            None => Err(PacketError::UnknownLayout),
        },
        _ => Err(PacketError::UnknownLayout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_json_array() {
        let channels = decode_packet(b"[1.5, -2, 3, 4, 99]", 4).unwrap();
        assert_eq!(channels, vec![1.5, -2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_decode_short_array_is_rejected() {
        let err = decode_packet(b"[1.0, 2.0]", 4).unwrap_err();
        assert_eq!(err, PacketError::WrongArity { expected: 4, got: 2 });
    }

    #[test]
    fn test_decode_channel_object() {
        let payload = br#"{"Ch1": 10.0, "Ch2": [1.0, 2.0, 7.5], "Ch4": null}"#;
        let channels = decode_packet(payload, 4).unwrap();
        assert_eq!(channels, vec![10.0, 7.5, 0.0, 0.0]);
    }

    #[test]
    fn test_decode_nested_channels() {
        let payload = br#"{"channels": [1, 2, 3]}"#;
        assert_eq!(decode_packet(payload, 3).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_decode_rejects_double_nesting() {
        let payload = br#"{"channels": {"channels": [1, 2, 3]}}"#;
        assert_eq!(decode_packet(payload, 3).unwrap_err(), PacketError::UnknownLayout);
    }

    #[test]
    fn test_decode_non_numeric() {
        let err = decode_packet(br#"[1, "x", 3]"#, 3).unwrap_err();
        assert_eq!(err, PacketError::NonNumeric(1));
    }

    #[test]
    fn test_decode_binary_f32() {
        let mut payload = Vec::new();
        for v in [0.5f32, -1.25, 8.0] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(decode_packet(&payload, 3).unwrap(), vec![0.5, -1.25, 8.0]);
    }

    #[test]
    fn test_decode_binary_nan_rejected() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1.0f32.to_le_bytes());
        payload.extend_from_slice(&f32::NAN.to_le_bytes());
        assert_eq!(decode_packet(&payload, 2).unwrap_err(), PacketError::NonFinite(1));
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode_packet(&[0xff, 0x00, 0x13], 4).unwrap_err();
        assert_eq!(err, PacketError::UnknownEncoding { expected_bytes: 16 });
    }

    #[test]
    fn test_receive_and_count_drops() {
        let mut source = UdpSource::bind("127.0.0.1:0", 3, 125).unwrap();
        let target = source.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        sender.send_to(b"not-a-sample!!", target).unwrap();
        sender.send_to(b"[1.0, 2.0, 3.0]", target).unwrap();

        let mut produced = Vec::new();
        for _ in 0..20 {
            if let Some(sample) = source.produce() {
                produced.push(sample);
            }
            if produced.len() == 1 && source.drop_counter().get() == 1 {
                break;
            }
        }

        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].channels(), &[1.0, 2.0, 3.0]);
        assert!(!produced[0].is_simulated());
        assert_eq!(source.drop_counter().get(), 1);
        assert_eq!(source.packets_received(), 1);
    }

    #[test]
    fn test_bind_with_timeout_reports_bind_error() {
        let first = UdpSource::bind("127.0.0.1:0", 2, 125).unwrap();
        let taken = first.local_addr().unwrap().to_string();
        let result = UdpSource::bind_with_timeout(&taken, 2, 125, Duration::from_secs(1));
        assert!(matches!(result, Err(SourceError::Bind { .. })));
    }
}

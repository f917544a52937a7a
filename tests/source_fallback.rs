//! Bind failure falls back to the simulated source without an error

use neurolog::{open_source, Pipeline, PipelineConfig, SourceConfig};
use std::net::UdpSocket;
use std::time::{Duration, Instant};

#[test]
fn test_port_in_use_falls_back_to_simulation() {
    let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
    let config = SourceConfig {
        addr: taken.local_addr().unwrap().to_string(),
        channel_count: 8,
        bind_timeout: Duration::from_millis(500),
        seed: Some(3),
        ..Default::default()
    };

    let mut source = open_source(&config);
    assert!(source.is_simulated());
    assert_eq!(source.channel_count(), 8);
    for _ in 0..5 {
        let sample = source.produce().unwrap();
        assert!(sample.is_simulated());
        assert_eq!(sample.channel_count(), 8);
    }
}

#[test]
fn test_fallback_status_reports_simulated() {
    let config = SourceConfig {
        addr: "256.0.0.1:99999".to_string(),
        channel_count: 4,
        bind_timeout: Duration::from_millis(500),
        seed: Some(4),
        ..Default::default()
    };
    let handle = Pipeline::start(open_source(&config), PipelineConfig::default());

    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.status().samples_dispatched < 5 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let status = handle.status();
    assert!(status.simulated);
    assert!(status.connected);
    assert!(status.samples_dispatched >= 5);
    assert_eq!(status.packets_dropped, 0);
    handle.stop();
}

#[test]
fn test_network_source_when_port_free() {
    let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let config = SourceConfig {
        addr: addr.to_string(),
        channel_count: 2,
        filter_enabled: false,
        ..Default::default()
    };
    let source = open_source(&config);
    assert!(!source.is_simulated());
}

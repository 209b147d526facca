//! End-to-end runs of the software backends

use crossbeam_channel::unbounded;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use sound_bridge::audio::{AudioPort, FilePlaybackPort, LinkImpairment, LinkSimulatorPort, Sample};
use sound_bridge::bridge::Bridge;
use sound_bridge::codec::{decode_f64_le, encode_f32_le, encode_f64_le};
use sound_bridge::config::{AppConfig, DeviceConfig, LinkConfig};
use sound_bridge::network::BroadcastServer;

const SEED: u64 = 7;

fn device(sample_rate: u32, buffer_size: usize) -> DeviceConfig {
    DeviceConfig {
        device: String::new(),
        sample_rate,
        buffer_size,
    }
}

#[test]
fn test_link_delivers_impaired_playback() {
    let link = LinkConfig {
        noise_level: 0.0,
        low_cut: 1.0,
        high_cut: 3.0,
        bpf_order: 1,
    };
    let mut config = AppConfig::default();
    config.input = device(8, 4);
    config.output = device(8, 4);
    config.link = link.clone();

    let mut port = LinkSimulatorPort::new();
    let mut played = 0;
    port.output_callback(Box::new(move |frame| {
        if played < 4 {
            frame.fill(1.0);
            played += 1;
        }
    }));
    let (tx, rx) = unbounded::<Vec<Sample>>();
    port.input_callback(Box::new(move |frame| {
        let _ = tx.send(frame.to_vec());
    }));

    port.initialize_seeded(&config, SEED).unwrap();
    port.open().unwrap();

    let mut captured = Vec::new();
    for _ in 0..4 {
        let frame = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(frame.len(), 4);
        captured.extend(frame);
    }
    port.dispose();

    let mut expected = vec![1.0; 16];
    LinkImpairment::with_seed(&link, 8.0, SEED)
        .unwrap()
        .apply(&mut expected);

    assert!(captured.iter().all(|s| s.is_finite()));
    assert_eq!(captured, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_capture_reaches_tcp_peer() {
    let dir = tempfile::tempdir().unwrap();
    let source: Vec<Sample> = (1..=6).map(|i| i as Sample * 0.125).collect();
    let path = dir.path().join("tone.f32");
    std::fs::write(&path, encode_f32_le(&source)).unwrap();

    let mut config = AppConfig::default();
    config.input = device(1000, 3);
    config.file.input = path;

    let server = Arc::new(BroadcastServer::new(0));
    let addr = server.start().await.unwrap();
    let bridge = Bridge::new(server.clone());

    let mut port = FilePlaybackPort::new();
    bridge.wire(&mut port);

    let mut client = TcpStream::connect(SocketAddr::from(([127, 0, 0, 1], addr.port())))
        .await
        .unwrap();
    for _ in 0..200 {
        if server.peer_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(server.peer_count(), 1);

    port.initialize(&config).unwrap();
    port.open().unwrap();

    let mut bytes = vec![0u8; 8 * 12];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut bytes))
        .await
        .unwrap()
        .unwrap();
    let received = decode_f64_le(&bytes);

    // The peer joined before capture started, so it sees the source from
    // its first sample and through one wrap
    let expected: Vec<Sample> = source.iter().cycle().take(12).copied().collect();
    assert_eq!(received, expected);

    // Bytes from the peer land in the playback buffer, split across writes
    let downlink = encode_f64_le(&[0.5, -0.5]);
    client.write_all(&downlink[..5]).await.unwrap();
    client.write_all(&downlink[5..]).await.unwrap();
    for _ in 0..200 {
        if bridge.elastic().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(bridge.elastic().get(2), vec![0.5, -0.5]);

    server.stop();
    port.close();
    port.dispose();
}

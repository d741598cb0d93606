//! TCP 위 송수신 통합 테스트

use std::io::Write;

use tokio::net::TcpListener;

use arqlink::transport::{connect, serve};
use arqlink::{Config, FrameStore, Protocol};

fn lossy(protocol: Protocol, seed: u64) -> Config {
    let mut config = Config::new(protocol).with_window_size(4);
    config.frame_delivery_probability = 0.8;
    config.ack_delivery_probability = 0.8;
    config.timeout_ms = 150;
    config.payload_size = 16;
    config.rng_seed = Some(seed);
    config
}

async fn round_trip(protocol: Protocol, seed: u64, data: &[u8]) -> Vec<u8> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let receiver_config = lossy(protocol, seed + 100);

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream, &receiver_config).await
    });

    let config = lossy(protocol, seed);
    let integrity = config.integrity.build();
    let store = FrameStore::split(data, config.payload_size, integrity.as_ref()).unwrap();
    let total = store.len();

    let stats = connect(addr, &config, store).await.unwrap();
    assert_eq!(stats.ack_times.len() as u64, total);

    let report = server.await.unwrap().unwrap();
    assert_eq!(report.setup.protocol, protocol);
    assert_eq!(report.setup.total_frames, total);
    report
        .delivered
        .iter()
        .flat_map(|(_, payload)| payload.to_vec())
        .collect()
}

#[tokio::test]
async fn test_all_protocols_over_lossy_tcp() {
    let data: Vec<u8> = b"The quick brown fox jumps over the lazy dog. "
        .iter()
        .cycle()
        .take(400)
        .copied()
        .collect();

    for (protocol, seed) in [
        (Protocol::StopAndWait, 11),
        (Protocol::GoBackN, 12),
        (Protocol::SelectiveRepeat, 13),
    ] {
        assert_eq!(round_trip(protocol, seed, &data).await, data, "{protocol}");
    }
}

#[tokio::test]
async fn test_file_backed_transfer() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let contents: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    file.write_all(&contents).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream, &Config::reliable_link()).await
    });

    let config = Config::reliable_link().with_protocol(Protocol::SelectiveRepeat);
    let integrity = config.integrity.build();
    let store = FrameStore::from_file(file.path(), config.payload_size, integrity.as_ref()).unwrap();
    connect(addr, &config, store).await.unwrap();

    let report = server.await.unwrap().unwrap();
    let received: Vec<u8> = report
        .delivered
        .iter()
        .flat_map(|(_, payload)| payload.to_vec())
        .collect();
    assert_eq!(received, contents);
    assert_eq!(report.stats.duplicate_frames, 0);
}

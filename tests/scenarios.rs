//! 손실 패턴을 고정한 전체 세션 시나리오

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use arqlink::channel::MessageKind;
use arqlink::{
    Config, Crc32, Error, FrameStore, Perfect, Protocol, Scripted, Session, SeqNum, Transmission,
};

fn config(protocol: Protocol, window: usize) -> Config {
    Config::new(protocol)
        .with_window_size(window)
        .with_timeout(Duration::from_millis(100))
}

fn store(total: usize) -> FrameStore {
    FrameStore::from_units((0..total).map(|i| format!("frame-{i}")), &Crc32)
}

/// 프레임 전송 기록을 남기면서 `script` 결과로 전달 여부 결정
fn recording(
    script: Scripted,
) -> (
    impl FnMut(&Transmission) -> bool + Send + 'static,
    Arc<Mutex<Vec<(SeqNum, u32)>>>,
) {
    use arqlink::LossModel;

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let mut script = script;
    let model = move |t: &Transmission| {
        if t.kind == MessageKind::Frame {
            if let Some(seq) = t.seq {
                sink.lock().push((seq, t.attempt));
            }
        }
        script.decide(t) == arqlink::Fate::Deliver
    };
    (model, log)
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_wait_lost_frame() {
    let (frame_loss, log) = recording(Scripted::new().drop_frame(1, 1));

    let report = Session::with_loss(config(Protocol::StopAndWait, 1), frame_loss, Perfect)
        .run(store(3))
        .await
        .unwrap();

    assert_eq!(report.delivered_seqs(), vec![0, 1, 2]);
    assert_eq!(*log.lock(), vec![(0, 1), (1, 1), (1, 2), (2, 1)]);
    assert_eq!(report.sender.timeouts, 1);
    assert_eq!(report.sender.retransmissions, 1);
    assert_eq!(report.receiver.frames_delivered, 3);
}

#[tokio::test(start_paused = true)]
async fn test_go_back_n_lost_frame() {
    let (frame_loss, log) = recording(Scripted::new().drop_frame(2, 1));

    let report = Session::with_loss(config(Protocol::GoBackN, 3), frame_loss, Perfect)
        .run(store(5))
        .await
        .unwrap();

    assert_eq!(report.delivered_seqs(), vec![0, 1, 2, 3, 4]);
    // 3, 4는 순서 외로 폐기되고 타임아웃 후 2부터 다시 전송
    assert_eq!(
        *log.lock(),
        vec![(0, 1), (1, 1), (2, 1), (3, 1), (4, 1), (2, 2), (3, 2), (4, 2)]
    );
    assert_eq!(report.sender.duplicate_acks, 2);
    assert_eq!(report.sender.timeouts, 1);
    assert_eq!(report.receiver.duplicate_frames, 0);
}

#[tokio::test(start_paused = true)]
async fn test_selective_repeat_lost_frame() {
    let (frame_loss, log) = recording(Scripted::new().drop_frame(1, 1));

    let report = Session::with_loss(config(Protocol::SelectiveRepeat, 3), frame_loss, Perfect)
        .run(store(5))
        .await
        .unwrap();

    assert_eq!(report.delivered_seqs(), vec![0, 1, 2, 3, 4]);
    // NAK으로 1만 재전송
    assert_eq!(
        *log.lock(),
        vec![(0, 1), (1, 1), (2, 1), (3, 1), (1, 2), (4, 1)]
    );
    assert_eq!(report.receiver.naks_sent, 1);
    assert_eq!(report.receiver.buffered_frames, 2);
    assert_eq!(report.sender.retransmissions, 1);
    assert_eq!(report.sender.timeouts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_lost_acks_do_not_duplicate_delivery() {
    for protocol in [
        Protocol::StopAndWait,
        Protocol::GoBackN,
        Protocol::SelectiveRepeat,
    ] {
        // 모든 ACK/NAK의 첫 전송 손실
        let ack_loss = |t: &Transmission| t.attempt > 1;

        let report = Session::with_loss(config(protocol, 3), Perfect, ack_loss)
            .run(store(6))
            .await
            .unwrap();

        assert_eq!(report.delivered_seqs(), (0..6).collect::<Vec<_>>(), "{protocol}");
        assert!(report.receiver.duplicate_frames > 0, "{protocol}");
        assert_eq!(report.receiver.frames_delivered, 6, "{protocol}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_corruption_is_treated_as_loss() {
    for protocol in [
        Protocol::StopAndWait,
        Protocol::GoBackN,
        Protocol::SelectiveRepeat,
    ] {
        let frame_loss = Scripted::new().corrupt_frame(1, 1).corrupt_frame(3, 1);

        let report = Session::with_loss(config(protocol, 3), frame_loss, Perfect)
            .run(store(5))
            .await
            .unwrap();

        assert_eq!(report.delivered_seqs(), vec![0, 1, 2, 3, 4], "{protocol}");
        assert_eq!(report.receiver.corrupted_frames, 2, "{protocol}");
        assert!(report.sender.retransmissions >= 2, "{protocol}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_bernoulli_loss_eventually_delivers() {
    let data: Vec<u8> = (0..2000u32).map(|i| (i * 7 % 251) as u8).collect();

    for (protocol, seed) in [
        (Protocol::StopAndWait, 1),
        (Protocol::GoBackN, 2),
        (Protocol::SelectiveRepeat, 3),
    ] {
        let mut config = Config::lossy_link()
            .with_protocol(protocol)
            .with_window_size(4)
            .with_timeout(Duration::from_millis(100));
        config.frame_delivery_probability = 0.7;
        config.ack_delivery_probability = 0.7;
        config.payload_size = 64;
        config.rng_seed = Some(seed);

        let report = Session::new(config).transfer(&data).await.unwrap();

        assert_eq!(report.reassemble().as_ref(), data.as_slice(), "{protocol}");
        assert!(report.sender.retransmissions > 0, "{protocol}");
        assert_eq!(report.sender.ack_times.len(), 32, "{protocol}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_limit_aborts_session() {
    let mut config = config(Protocol::GoBackN, 3);
    config.max_attempts = Some(3);
    let frame_loss = |t: &Transmission| t.seq != Some(0);

    let result = Session::with_loss(config, frame_loss, Perfect)
        .run(store(4))
        .await;

    assert!(matches!(
        result,
        Err(Error::RetriesExhausted { seq: 0, attempts: 3 })
    ));
}

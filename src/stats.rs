//! 전송 통계

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::frame::SeqNum;

/// 한쪽 엔진(송신 또는 수신)의 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 종료 시간 (세션 완료 시 기록)
    pub end_time: Option<Instant>,

    /// 프레임 전송 시도 수 (재전송 포함)
    pub frames_sent: u64,

    /// 재전송 수
    pub retransmissions: u64,

    /// 채널에서 손실된 메시지 수
    pub dropped: u64,

    /// 타임아웃 발생 수
    pub timeouts: u64,

    /// 수신한 ACK 수 (송신측)
    pub acks_received: u64,

    /// 윈도우를 움직이지 못한 중복 ACK 수 (송신측)
    pub duplicate_acks: u64,

    /// 수신한 NAK 수 (송신측)
    pub naks_received: u64,

    /// 보낸 ACK 수 (수신측)
    pub acks_sent: u64,

    /// 보낸 NAK 수 (수신측)
    pub naks_sent: u64,

    /// 응용 계층으로 전달된 프레임 수 (수신측)
    pub frames_delivered: u64,

    /// 중복 수신 프레임 수 (수신측)
    pub duplicate_frames: u64,

    /// 무결성 검사 실패 프레임 수 (수신측)
    pub corrupted_frames: u64,

    /// 버퍼링된 순서 외 프레임 수 (Selective-Repeat 수신측)
    pub buffered_frames: u64,

    /// 프레임별 최초 전송 → ACK 까지 걸린 시간
    pub ack_times: BTreeMap<SeqNum, Duration>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            end_time: None,
            frames_sent: 0,
            retransmissions: 0,
            dropped: 0,
            timeouts: 0,
            acks_received: 0,
            duplicate_acks: 0,
            naks_received: 0,
            acks_sent: 0,
            naks_sent: 0,
            frames_delivered: 0,
            duplicate_frames: 0,
            corrupted_frames: 0,
            buffered_frames: 0,
            ack_times: BTreeMap::new(),
        }
    }

    /// 프레임 확인 시간 기록 (처음 확인된 시점만)
    pub fn record_ack_time(&mut self, seq: SeqNum, elapsed: Duration) {
        self.ack_times.entry(seq).or_insert(elapsed);
    }

    /// 카운터만 복사 (시간 기록과 `ack_times`는 그대로)
    pub fn sync_counters(&mut self, from: &TransferStats) {
        self.frames_sent = from.frames_sent;
        self.retransmissions = from.retransmissions;
        self.dropped = from.dropped;
        self.timeouts = from.timeouts;
        self.acks_received = from.acks_received;
        self.duplicate_acks = from.duplicate_acks;
        self.naks_received = from.naks_received;
        self.acks_sent = from.acks_sent;
        self.naks_sent = from.naks_sent;
        self.frames_delivered = from.frames_delivered;
        self.duplicate_frames = from.duplicate_frames;
        self.corrupted_frames = from.corrupted_frames;
        self.buffered_frames = from.buffered_frames;
    }

    /// 완료 표시
    pub fn finish(&mut self) {
        self.end_time.get_or_insert_with(Instant::now);
    }

    /// 경과 시간 (완료 시 고정)
    pub fn elapsed(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    /// 프레임별 확인 시간 합계
    pub fn total_ack_time(&self) -> Duration {
        self.ack_times.values().sum()
    }

    /// 프레임별 평균 확인 시간
    pub fn average_ack_time(&self) -> Option<Duration> {
        if self.ack_times.is_empty() {
            return None;
        }
        let nanos = self.total_ack_time().as_nanos() / self.ack_times.len() as u128;
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    /// 재전송 비율 (재전송 / 전체 전송)
    pub fn retransmission_ratio(&self) -> f64 {
        if self.frames_sent == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.frames_sent as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} (retx {}, {:.1}%) | Dropped: {} | Timeouts: {} | ACK rx/tx: {}/{} (dup {}) | NAK rx/tx: {}/{} | Delivered: {} (dup {}, corrupt {}) | Avg ack: {}",
            self.elapsed().as_secs_f64(),
            self.frames_sent,
            self.retransmissions,
            self.retransmission_ratio() * 100.0,
            self.dropped,
            self.timeouts,
            self.acks_received,
            self.acks_sent,
            self.duplicate_acks,
            self.naks_received,
            self.naks_sent,
            self.frames_delivered,
            self.duplicate_frames,
            self.corrupted_frames,
            self.average_ack_time()
                .map(|d| format!("{:.1}ms", d.as_secs_f64() * 1000.0))
                .unwrap_or_else(|| "-".into()),
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_time_first_record_wins() {
        let mut stats = TransferStats::new();
        stats.record_ack_time(0, Duration::from_millis(10));
        stats.record_ack_time(0, Duration::from_millis(99));
        stats.record_ack_time(1, Duration::from_millis(30));

        assert_eq!(stats.total_ack_time(), Duration::from_millis(40));
        assert_eq!(stats.average_ack_time(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_average_ack_time_in_nanos() {
        let mut stats = TransferStats::new();
        for seq in 0..3 {
            stats.record_ack_time(seq, Duration::from_nanos(1));
        }
        stats.record_ack_time(3, Duration::from_nanos(5));
        assert_eq!(stats.average_ack_time(), Some(Duration::from_nanos(2)));
        assert_eq!(TransferStats::new().average_ack_time(), None);
    }

    #[test]
    fn test_sync_counters_leaves_ack_times() {
        let mut source = TransferStats::new();
        source.frames_sent = 5;
        source.retransmissions = 2;
        source.frames_delivered = 3;
        source.record_ack_time(0, Duration::from_millis(4));

        let mut shared = TransferStats::new();
        shared.sync_counters(&source);

        assert_eq!(shared.frames_sent, 5);
        assert_eq!(shared.retransmissions, 2);
        assert_eq!(shared.frames_delivered, 3);
        assert!(shared.ack_times.is_empty());
        assert!(shared.end_time.is_none());
    }

    #[test]
    fn test_retransmission_ratio() {
        let mut stats = TransferStats::new();
        assert_eq!(stats.retransmission_ratio(), 0.0);

        stats.frames_sent = 8;
        stats.retransmissions = 2;
        assert!((stats.retransmission_ratio() - 0.25).abs() < f64::EPSILON);
        assert!(stats.summary().contains("retx 2"));
    }
}

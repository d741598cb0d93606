//! 수신 엔진
//!
//! - 무결성 검사 실패 프레임은 손실로 취급 (응답 없음)
//! - 순서대로만 응용 계층에 전달, 각 프레임은 정확히 한 번
//! - Selective-Repeat는 윈도우 안의 순서 외 프레임을 버퍼링하고 빈 자리마다 NAK 한 번

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::channel::LossyChannel;
use crate::frame::{Frame, SeqNum};
use crate::integrity::Integrity;
use crate::stats::TransferStats;
use crate::wire::Feedback;
use crate::{Config, Error, Protocol, Result};

/// 전달된 프레임 (번호, 원본 페이로드)
pub type Delivery = (SeqNum, Bytes);

/// 전달 채널 수신기 타입
pub type DeliveryReceiver = mpsc::UnboundedReceiver<Delivery>;

/// 상태 머신이 요청하는 동작
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverAction {
    /// 응용 계층으로 전달
    Deliver(SeqNum, Bytes),

    /// 송신자에게 ACK/NAK 전송
    Reply(Feedback),
}

/// 수신 윈도우 상태 머신
pub struct ReceiverWindow {
    protocol: Protocol,
    window_size: usize,
    total_frames: u64,
    integrity: Arc<dyn Integrity>,

    /// 다음에 전달할 프레임
    expected: SeqNum,

    /// [expected, expected + N) 안에서 받았지만 아직 전달하지 않은 프레임
    buffer: BTreeMap<SeqNum, Bytes>,

    /// 이미 NAK을 보낸 빈 자리
    pending_nak: Option<SeqNum>,

    stats: TransferStats,
}

impl ReceiverWindow {
    pub fn new(
        protocol: Protocol,
        window_size: usize,
        total_frames: u64,
        integrity: Arc<dyn Integrity>,
    ) -> Self {
        let window_size = match protocol {
            Protocol::StopAndWait => 1,
            _ => window_size.max(1),
        };

        Self {
            protocol,
            window_size,
            total_frames,
            integrity,
            expected: 0,
            buffer: BTreeMap::new(),
            pending_nak: None,
            stats: TransferStats::new(),
        }
    }

    pub fn from_config(config: &Config, total_frames: u64) -> Self {
        Self::new(
            config.protocol,
            config.effective_window(),
            total_frames,
            config.integrity.build(),
        )
    }

    pub fn expected(&self) -> SeqNum {
        self.expected
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// 모든 프레임 전달 완료 여부
    pub fn is_complete(&self) -> bool {
        self.expected >= self.total_frames
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// 프레임 수신 처리
    pub fn on_frame(&mut self, frame: Frame) -> Result<Vec<ReceiverAction>> {
        let seq = frame.seq;
        if seq >= self.total_frames {
            return Err(Error::ProtocolViolation(format!(
                "프레임 {seq}: 전체 {}개 범위 밖",
                self.total_frames
            )));
        }

        let Some(data) = self.integrity.open(&frame.payload) else {
            self.stats.corrupted_frames += 1;
            debug!(seq, scheme = self.integrity.name(), "무결성 검사 실패, 폐기");
            return Ok(Vec::new());
        };

        let actions = match self.protocol {
            Protocol::StopAndWait | Protocol::GoBackN => self.in_order(seq, data),
            Protocol::SelectiveRepeat => self.selective(seq, data),
        };

        for action in &actions {
            match action {
                ReceiverAction::Deliver(..) => self.stats.frames_delivered += 1,
                ReceiverAction::Reply(Feedback::Nak(_)) => self.stats.naks_sent += 1,
                ReceiverAction::Reply(_) => self.stats.acks_sent += 1,
            }
        }
        if self.is_complete() {
            self.stats.finish();
        }
        Ok(actions)
    }

    /// Stop-and-Wait, Go-Back-N: 기대한 프레임만 수락
    fn in_order(&mut self, seq: SeqNum, data: Bytes) -> Vec<ReceiverAction> {
        if seq == self.expected {
            self.expected += 1;
            debug!(seq, "프레임 수락");
            return vec![
                ReceiverAction::Deliver(seq, data),
                ReceiverAction::Reply(Feedback::Ack(seq)),
            ];
        }

        if seq < self.expected {
            self.stats.duplicate_frames += 1;
        }
        debug!(seq, expected = self.expected, "순서 외 프레임 폐기");

        // 마지막으로 순서대로 받은 프레임을 다시 확인 (아직 없으면 응답 없음)
        match self.expected.checked_sub(1) {
            Some(last) => vec![ReceiverAction::Reply(Feedback::Ack(last))],
            None => Vec::new(),
        }
    }

    /// Selective-Repeat: 윈도우 안이면 버퍼링, 개별 ACK
    fn selective(&mut self, seq: SeqNum, data: Bytes) -> Vec<ReceiverAction> {
        if seq < self.expected || self.buffer.contains_key(&seq) {
            self.stats.duplicate_frames += 1;
            debug!(seq, "중복 프레임, ACK 재전송");
            return vec![ReceiverAction::Reply(Feedback::Ack(seq))];
        }

        if seq >= self.expected + self.window_size as u64 {
            warn!(
                seq,
                expected = self.expected,
                window = self.window_size,
                "윈도우 밖 프레임 폐기"
            );
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.buffer.insert(seq, data);

        if seq == self.expected {
            while let Some(data) = self.buffer.remove(&self.expected) {
                actions.push(ReceiverAction::Deliver(self.expected, data));
                self.expected += 1;
            }
            if matches!(self.pending_nak, Some(gap) if gap < self.expected) {
                self.pending_nak = None;
            }
            debug!(seq, expected = self.expected, "프레임 수락");
        } else {
            self.stats.buffered_frames += 1;
            debug!(seq, expected = self.expected, "순서 외 프레임 버퍼링");
            if self.pending_nak != Some(self.expected) {
                self.pending_nak = Some(self.expected);
                actions.push(ReceiverAction::Reply(Feedback::Nak(self.expected)));
            }
        }

        actions.push(ReceiverAction::Reply(Feedback::Ack(seq)));
        actions
    }
}

/// 수신 액터
///
/// 프레임 큐가 닫힐 때까지 실행.
pub struct Receiver {
    window: ReceiverWindow,
    frame_rx: mpsc::UnboundedReceiver<Frame>,
    feedback: LossyChannel<Feedback>,
    delivery_tx: mpsc::UnboundedSender<Delivery>,
    stats: Arc<RwLock<TransferStats>>,
}

impl Receiver {
    /// 새 수신자 생성
    pub fn new(
        config: &Config,
        total_frames: u64,
        frame_rx: mpsc::UnboundedReceiver<Frame>,
        feedback: LossyChannel<Feedback>,
    ) -> Result<(Self, DeliveryReceiver)> {
        config.validate()?;
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();

        let receiver = Self {
            window: ReceiverWindow::from_config(config, total_frames),
            frame_rx,
            feedback,
            delivery_tx,
            stats: Arc::new(RwLock::new(TransferStats::new())),
        };
        Ok((receiver, delivery_rx))
    }

    pub fn stats_handle(&self) -> Arc<RwLock<TransferStats>> {
        self.stats.clone()
    }

    pub async fn run(mut self) -> Result<TransferStats> {
        info!(
            protocol = %self.window.protocol,
            frames = self.window.total_frames(),
            "수신 시작"
        );

        while let Some(frame) = self.frame_rx.recv().await {
            for action in self.window.on_frame(frame)? {
                match action {
                    ReceiverAction::Deliver(seq, data) => {
                        if self.delivery_tx.send((seq, data)).is_err() {
                            trace!(seq, "전달 채널 닫힘");
                        }
                    }
                    ReceiverAction::Reply(feedback) => self.reply(feedback)?,
                }
            }

            // 카운터만 갱신
            let mut shared = self.stats.write();
            shared.sync_counters(self.window.stats());
            shared.dropped = self.feedback.dropped();
        }

        let stats = self.snapshot();
        *self.stats.write() = stats.clone();

        if self.window.is_complete() {
            info!("수신 완료: {}", stats.summary());
        } else {
            warn!(
                delivered = self.window.expected(),
                total = self.window.total_frames(),
                "모든 프레임을 받기 전에 종료됨"
            );
        }
        Ok(stats)
    }

    fn reply(&mut self, feedback: Feedback) -> Result<()> {
        match self.feedback.transmit(feedback) {
            Ok(true) => trace!(%feedback, "피드백 전송"),
            Ok(false) => debug!(%feedback, "피드백 손실 (시뮬레이션)"),
            // 송신자가 이미 완료하고 떠난 경우
            Err(Error::ConnectionClosed) => trace!(%feedback, "송신자 종료됨"),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn snapshot(&self) -> TransferStats {
        let mut stats = self.window.stats().clone();
        stats.dropped = self.feedback.dropped();
        stats
    }
}

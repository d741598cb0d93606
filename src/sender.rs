//! 송신 엔진
//!
//! - `SenderWindow`: I/O 없는 슬라이딩 윈도우 상태 머신
//! - `Sender`: 손실 채널, 피드백 큐, 타이머를 묶어 상태 머신을 구동하는 비동기 액터
//!
//! 상태 머신은 "무엇을 할지"만 `SenderAction`으로 반환하고,
//! 실제 전송과 타이머 조작은 액터가 수행.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::channel::LossyChannel;
use crate::frame::{Frame, FrameStore, SeqNum};
use crate::stats::TransferStats;
use crate::timer::{TimerKey, TimerSet};
use crate::wire::Feedback;
use crate::{Config, Error, Protocol, Result};

/// 송신측 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// 아직 시작 전
    Idle,

    /// 보낼 프레임이 남아 있음
    WindowOpen,

    /// 모든 프레임을 한 번 이상 보냈고 확인 대기 중
    Draining,

    /// 모든 프레임 확인 완료
    Done,
}

/// 전송 중인 프레임 기록
#[derive(Debug, Clone)]
pub struct InFlightRecord {
    pub seq: SeqNum,

    /// 최초 전송 시각 (확인 시간 측정용)
    pub first_sent: Instant,

    /// 마지막 전송 시각
    pub last_sent: Instant,

    /// 전송 횟수 (최초 전송 포함)
    pub send_count: u32,

    /// 개별 확인 여부 (Selective-Repeat)
    pub acked: bool,
}

impl InFlightRecord {
    fn new(seq: SeqNum, now: Instant) -> Self {
        Self {
            seq,
            first_sent: now,
            last_sent: now,
            send_count: 1,
            acked: false,
        }
    }
}

/// 상태 머신이 요청하는 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderAction {
    /// 프레임 전송 (`attempt > 1`이면 재전송)
    Transmit { seq: SeqNum, attempt: u32 },

    /// 타이머 시작 (이미 동작 중이면 유지)
    ArmTimer(TimerKey),

    /// 타이머 재시작
    ResetTimer(TimerKey),

    /// 타이머 취소
    CancelTimer(TimerKey),

    /// 전송 완료
    Finished,
}

/// 송신 윈도우 상태 머신
#[derive(Debug)]
pub struct SenderWindow {
    protocol: Protocol,
    window_size: usize,
    total_frames: u64,
    max_attempts: Option<u32>,

    /// 가장 오래된 미확인 프레임
    base: SeqNum,

    /// 다음에 처음 보낼 프레임
    next_to_send: SeqNum,

    /// [base, next_to_send) 구간의 기록
    in_flight: BTreeMap<SeqNum, InFlightRecord>,

    started: bool,
    stats: TransferStats,
}

impl SenderWindow {
    pub fn new(protocol: Protocol, window_size: usize, total_frames: u64) -> Self {
        let window_size = match protocol {
            Protocol::StopAndWait => 1,
            _ => window_size.max(1),
        };

        Self {
            protocol,
            window_size,
            total_frames,
            max_attempts: None,
            base: 0,
            next_to_send: 0,
            in_flight: BTreeMap::new(),
            started: false,
            stats: TransferStats::new(),
        }
    }

    /// 설정에서 생성
    pub fn from_config(config: &Config, total_frames: u64) -> Self {
        let mut window = Self::new(config.protocol, config.effective_window(), total_frames);
        window.max_attempts = config.max_attempts;
        window
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn state(&self) -> SenderState {
        if !self.started {
            SenderState::Idle
        } else if self.base >= self.total_frames {
            SenderState::Done
        } else if self.next_to_send >= self.total_frames {
            SenderState::Draining
        } else {
            SenderState::WindowOpen
        }
    }

    pub fn is_done(&self) -> bool {
        self.state() == SenderState::Done
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn base(&self) -> SeqNum {
        self.base
    }

    pub fn next_to_send(&self) -> SeqNum {
        self.next_to_send
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// 확인되지 않은 전송 중 프레임 수
    pub fn outstanding(&self) -> usize {
        self.in_flight.values().filter(|r| !r.acked).count()
    }

    pub fn record(&self, seq: SeqNum) -> Option<&InFlightRecord> {
        self.in_flight.get(&seq)
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// 전송 시작: 윈도우를 채움
    pub fn start(&mut self) -> Vec<SenderAction> {
        let mut actions = Vec::new();
        if self.started {
            return actions;
        }
        self.started = true;

        self.fill(&mut actions);
        if self.is_done() {
            // 보낼 프레임이 없는 세션
            actions.push(SenderAction::Finished);
        }
        actions
    }

    /// 윈도우 안의 아직 보내지 않은 프레임을 모두 전송
    fn fill(&mut self, actions: &mut Vec<SenderAction>) {
        let was_empty = self.in_flight.is_empty();
        let limit = (self.base + self.window_size as u64).min(self.total_frames);

        while self.next_to_send < limit {
            let seq = self.next_to_send;
            self.in_flight.insert(seq, InFlightRecord::new(seq, Instant::now()));
            self.stats.frames_sent += 1;
            actions.push(SenderAction::Transmit { seq, attempt: 1 });

            if self.protocol == Protocol::SelectiveRepeat {
                actions.push(SenderAction::ArmTimer(TimerKey::Frame(seq)));
            }
            self.next_to_send += 1;
        }

        if self.protocol != Protocol::SelectiveRepeat && was_empty && !self.in_flight.is_empty() {
            actions.push(SenderAction::ArmTimer(TimerKey::Window));
        }

        debug_assert!(self.in_flight.len() <= self.window_size);
    }

    /// ACK/NAK 처리
    pub fn on_feedback(&mut self, feedback: Feedback) -> Result<Vec<SenderAction>> {
        if self.is_done() {
            trace!(%feedback, "완료 후 도착한 피드백 무시");
            return Ok(Vec::new());
        }

        match (self.protocol, feedback) {
            (Protocol::StopAndWait, Feedback::BareAck) => self.ack_cumulative(self.base),
            (Protocol::StopAndWait | Protocol::GoBackN, Feedback::Ack(k)) => self.ack_cumulative(k),
            (Protocol::SelectiveRepeat, Feedback::Ack(k)) => self.ack_selective(k),
            (Protocol::SelectiveRepeat, Feedback::Nak(k)) => self.nak(k),
            (protocol, feedback) => Err(Error::ProtocolViolation(format!(
                "{protocol}에서 허용되지 않는 피드백: {feedback}"
            ))),
        }
    }

    /// 누적 ACK (Stop-and-Wait, Go-Back-N)
    fn ack_cumulative(&mut self, k: SeqNum) -> Result<Vec<SenderAction>> {
        self.stats.acks_received += 1;

        if k < self.base {
            self.stats.duplicate_acks += 1;
            debug!(ack = k, base = self.base, "중복 ACK 무시");
            return Ok(Vec::new());
        }
        if k >= self.next_to_send {
            return Err(Error::ProtocolViolation(format!(
                "보내지 않은 프레임에 대한 ACK({k}), next_to_send={}",
                self.next_to_send
            )));
        }

        let now = Instant::now();
        let remaining = self.in_flight.split_off(&(k + 1));
        for (seq, record) in std::mem::replace(&mut self.in_flight, remaining) {
            self.stats
                .record_ack_time(seq, now.duration_since(record.first_sent));
        }
        self.base = k + 1;
        debug!(ack = k, base = self.base, "윈도우 이동");

        let mut actions = Vec::new();
        if self.in_flight.is_empty() {
            actions.push(SenderAction::CancelTimer(TimerKey::Window));
        } else {
            actions.push(SenderAction::ResetTimer(TimerKey::Window));
        }

        self.fill(&mut actions);
        if self.is_done() {
            actions.push(SenderAction::Finished);
        }
        Ok(actions)
    }

    /// 개별 ACK (Selective-Repeat)
    fn ack_selective(&mut self, k: SeqNum) -> Result<Vec<SenderAction>> {
        self.stats.acks_received += 1;

        if k >= self.next_to_send {
            return Err(Error::ProtocolViolation(format!(
                "보내지 않은 프레임에 대한 ACK({k}), next_to_send={}",
                self.next_to_send
            )));
        }

        let now = Instant::now();
        match self.in_flight.get_mut(&k) {
            Some(record) if !record.acked => {
                record.acked = true;
                self.stats
                    .record_ack_time(k, now.duration_since(record.first_sent));
            }
            _ => {
                self.stats.duplicate_acks += 1;
                debug!(ack = k, base = self.base, "중복 ACK 무시");
                return Ok(Vec::new());
            }
        }

        let mut actions = vec![SenderAction::CancelTimer(TimerKey::Frame(k))];

        // base부터 연속으로 확인된 프레임만큼 윈도우 이동
        while let Some(record) = self.in_flight.get(&self.base) {
            if !record.acked {
                break;
            }
            self.in_flight.remove(&self.base);
            self.base += 1;
        }
        debug!(ack = k, base = self.base, "개별 확인");

        self.fill(&mut actions);
        if self.is_done() {
            actions.push(SenderAction::Finished);
        }
        Ok(actions)
    }

    /// NAK: 해당 프레임만 즉시 재전송 (Selective-Repeat)
    fn nak(&mut self, k: SeqNum) -> Result<Vec<SenderAction>> {
        self.stats.naks_received += 1;

        if k >= self.next_to_send {
            return Err(Error::ProtocolViolation(format!(
                "보내지 않은 프레임에 대한 NAK({k}), next_to_send={}",
                self.next_to_send
            )));
        }

        let mut actions = Vec::new();
        match self.in_flight.get(&k) {
            Some(record) if !record.acked => {
                debug!(nak = k, "NAK 수신, 선택 재전송");
                self.retransmit(k, &mut actions)?;
                actions.push(SenderAction::ResetTimer(TimerKey::Frame(k)));
            }
            _ => trace!(nak = k, "이미 확인된 프레임의 NAK 무시"),
        }
        Ok(actions)
    }

    /// 타이머 만료 처리
    pub fn on_timeout(&mut self, key: TimerKey) -> Result<Vec<SenderAction>> {
        let mut actions = Vec::new();
        if self.is_done() {
            return Ok(actions);
        }

        match (self.protocol, key) {
            (Protocol::StopAndWait | Protocol::GoBackN, TimerKey::Window) => {
                if self.in_flight.is_empty() {
                    return Ok(actions);
                }
                self.stats.timeouts += 1;
                debug!(
                    base = self.base,
                    next = self.next_to_send,
                    "타임아웃: 윈도우 전체 재전송"
                );
                for seq in self.base..self.next_to_send {
                    self.retransmit(seq, &mut actions)?;
                }
                actions.push(SenderAction::ResetTimer(TimerKey::Window));
            }
            (Protocol::SelectiveRepeat, TimerKey::Frame(seq)) => match self.in_flight.get(&seq) {
                Some(record) if !record.acked => {
                    self.stats.timeouts += 1;
                    debug!(seq, "타임아웃: 프레임 재전송");
                    self.retransmit(seq, &mut actions)?;
                    actions.push(SenderAction::ResetTimer(TimerKey::Frame(seq)));
                }
                _ => trace!(seq, "확인된 프레임의 타이머 만료 무시"),
            },
            (protocol, key) => warn!(%protocol, ?key, "프로토콜과 맞지 않는 타이머"),
        }
        Ok(actions)
    }

    fn retransmit(&mut self, seq: SeqNum, actions: &mut Vec<SenderAction>) -> Result<()> {
        let record = self
            .in_flight
            .get_mut(&seq)
            .ok_or_else(|| Error::ProtocolViolation(format!("전송 기록 없는 프레임 {seq}")))?;

        if let Some(max) = self.max_attempts {
            if record.send_count >= max {
                return Err(Error::RetriesExhausted {
                    seq,
                    attempts: record.send_count,
                });
            }
        }

        record.send_count += 1;
        record.last_sent = Instant::now();
        self.stats.frames_sent += 1;
        self.stats.retransmissions += 1;
        actions.push(SenderAction::Transmit {
            seq,
            attempt: record.send_count,
        });
        Ok(())
    }
}

/// 송신 액터
pub struct Sender {
    config: Config,
    store: FrameStore,
    window: SenderWindow,
    channel: LossyChannel<Frame>,
    feedback_rx: mpsc::UnboundedReceiver<Feedback>,
    timers: TimerSet,
    stats: Arc<RwLock<TransferStats>>,
}

impl Sender {
    /// 새 송신자 생성
    pub fn new(
        config: &Config,
        store: FrameStore,
        channel: LossyChannel<Frame>,
        feedback_rx: mpsc::UnboundedReceiver<Feedback>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            window: SenderWindow::from_config(config, store.len()),
            config: config.clone(),
            store,
            channel,
            feedback_rx,
            timers: TimerSet::new(),
            stats: Arc::new(RwLock::new(TransferStats::new())),
        })
    }

    /// 실행 중 통계 조회용 핸들
    pub fn stats_handle(&self) -> Arc<RwLock<TransferStats>> {
        self.stats.clone()
    }

    /// 모든 프레임이 확인될 때까지 실행
    pub async fn run(mut self) -> Result<TransferStats> {
        self.run_to_completion().await
    }

    /// `run`과 같지만 액터를 소비하지 않음
    pub async fn run_to_completion(&mut self) -> Result<TransferStats> {
        info!(
            protocol = %self.config.protocol,
            frames = self.store.len(),
            window = self.window.window_size(),
            "전송 시작"
        );

        let actions = self.window.start();
        self.execute(actions)?;

        while !self.window.is_done() {
            let base = self.window.base();

            // 같은 시점에 도착한 ACK를 타임아웃보다 먼저 처리
            let actions = tokio::select! {
                biased;

                feedback = self.feedback_rx.recv() => match feedback {
                    Some(feedback) => {
                        trace!(%feedback, "피드백 수신");
                        self.window.on_feedback(feedback)?
                    }
                    None => return Err(Error::ConnectionClosed),
                },
                key = self.timers.expired() => self.window.on_timeout(key)?,
            };
            self.execute(actions)?;

            // base 아래 프레임은 다시 보내지 않음
            if self.window.base() > base {
                self.channel.forget_below(self.window.base());
            }
        }

        self.timers.cancel_all();
        let stats = self.snapshot();
        *self.stats.write() = stats.clone();

        info!("전송 완료: {}", stats.summary());
        Ok(stats)
    }

    /// 대기 중인 재전송 타이머 수
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    fn execute(&mut self, actions: Vec<SenderAction>) -> Result<()> {
        let timeout = self.config.timeout();

        for action in actions {
            match action {
                SenderAction::Transmit { seq, attempt } => {
                    let frame = self.store.get(seq).cloned().ok_or_else(|| {
                        Error::ProtocolViolation(format!("프레임 저장소에 없는 번호 {seq}"))
                    })?;
                    if self.channel.transmit(frame)? {
                        debug!(seq, attempt, "프레임 전송");
                    } else {
                        debug!(seq, attempt, "프레임 손실 (시뮬레이션)");
                    }
                }
                SenderAction::ArmTimer(key) => self.timers.arm(key, timeout),
                SenderAction::ResetTimer(key) => self.timers.reset(key, timeout),
                SenderAction::CancelTimer(key) => {
                    self.timers.cancel(key);
                }
                SenderAction::Finished => self.timers.cancel_all(),
            }
        }

        // 카운터만 갱신, ack_times는 완료 시 한 번 복사
        let mut shared = self.stats.write();
        shared.sync_counters(self.window.stats());
        shared.dropped = self.channel.dropped();
        Ok(())
    }

    fn snapshot(&self) -> TransferStats {
        let mut stats = self.window.stats().clone();
        stats.dropped = self.channel.dropped();
        if self.window.is_done() {
            stats.finish();
        }
        stats
    }
}

//! 손실 채널
//!
//! 각 전송마다 독립적으로 전달/손실/손상을 결정.
//! 순서 변경이나 복제는 일으키지 않음 (중복은 재전송 로직에서만 발생).
//! 손실 결정은 주입 가능한 `LossModel`로 분리되어 테스트에서 결정적으로 재현 가능.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::trace;

use crate::frame::{Frame, SeqNum};
use crate::wire::Feedback;
use crate::{Error, Result};

/// 채널을 지나는 메시지 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Frame,
    Ack,
    Nak,
}

/// 손실 모델에 전달되는 전송 정보
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    /// 메시지 종류
    pub kind: MessageKind,

    /// 시퀀스 번호 (번호 없는 ACK는 None)
    pub seq: Option<SeqNum>,

    /// 이 채널에서 같은 (종류, 번호)의 몇 번째 전송인지 (1부터)
    pub attempt: u32,
}

/// 전송 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    /// 정상 전달
    Deliver,

    /// 조용히 폐기
    Drop,

    /// 비트 하나가 뒤집힌 채로 전달
    Corrupt,
}

/// 전송별 손실 결정
pub trait LossModel: Send {
    fn decide(&mut self, transmission: &Transmission) -> Fate;
}

/// `|t| delivered` 형태 클로저도 손실 모델로 사용 가능
impl<F> LossModel for F
where
    F: FnMut(&Transmission) -> bool + Send,
{
    fn decide(&mut self, transmission: &Transmission) -> Fate {
        if self(transmission) {
            Fate::Deliver
        } else {
            Fate::Drop
        }
    }
}

/// 손실 없는 채널
#[derive(Debug, Clone, Copy, Default)]
pub struct Perfect;

impl LossModel for Perfect {
    fn decide(&mut self, _: &Transmission) -> Fate {
        Fate::Deliver
    }
}

/// 독립 베르누이 손실
#[derive(Debug)]
pub struct Bernoulli {
    delivery_probability: f64,
    rng: StdRng,
}

impl Bernoulli {
    /// `delivery_probability` 확률로 전달, seed가 있으면 재현 가능
    pub fn new(delivery_probability: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            delivery_probability: delivery_probability.clamp(0.0, 1.0),
            rng,
        }
    }
}

impl LossModel for Bernoulli {
    fn decide(&mut self, _: &Transmission) -> Fate {
        if self.rng.gen_bool(self.delivery_probability) {
            Fate::Deliver
        } else {
            Fate::Drop
        }
    }
}

/// 지정한 (종류, 번호, 시도)만 손실/손상시키는 결정적 모델
#[derive(Debug, Clone, Default)]
pub struct Scripted {
    drops: HashSet<(MessageKind, Option<SeqNum>, u32)>,
    corruptions: HashSet<(MessageKind, Option<SeqNum>, u32)>,
}

impl Scripted {
    pub fn new() -> Self {
        Self::default()
    }

    /// 프레임 `seq`의 `attempt`번째 전송을 폐기
    pub fn drop_frame(mut self, seq: SeqNum, attempt: u32) -> Self {
        self.drops.insert((MessageKind::Frame, Some(seq), attempt));
        self
    }

    /// 프레임 `seq`의 `attempt`번째 전송을 손상
    pub fn corrupt_frame(mut self, seq: SeqNum, attempt: u32) -> Self {
        self.corruptions
            .insert((MessageKind::Frame, Some(seq), attempt));
        self
    }

    /// ACK(seq)의 `attempt`번째 전송을 폐기
    pub fn drop_ack(mut self, seq: SeqNum, attempt: u32) -> Self {
        self.drops.insert((MessageKind::Ack, Some(seq), attempt));
        self
    }

    /// NAK(seq)의 `attempt`번째 전송을 폐기
    pub fn drop_nak(mut self, seq: SeqNum, attempt: u32) -> Self {
        self.drops.insert((MessageKind::Nak, Some(seq), attempt));
        self
    }
}

impl LossModel for Scripted {
    fn decide(&mut self, t: &Transmission) -> Fate {
        let key = (t.kind, t.seq, t.attempt);
        if self.drops.contains(&key) {
            Fate::Drop
        } else if self.corruptions.contains(&key) {
            Fate::Corrupt
        } else {
            Fate::Deliver
        }
    }
}

/// 채널을 통과할 수 있는 메시지
pub trait Transmit: Send + 'static {
    fn kind(&self) -> MessageKind;

    fn seq(&self) -> Option<SeqNum>;

    /// 손상 시뮬레이션 (기본: 변화 없음)
    fn corrupt(&mut self) {}
}

impl Transmit for Frame {
    fn kind(&self) -> MessageKind {
        MessageKind::Frame
    }

    fn seq(&self) -> Option<SeqNum> {
        Some(self.seq)
    }

    fn corrupt(&mut self) {
        Frame::corrupt(self);
    }
}

impl Transmit for Feedback {
    fn kind(&self) -> MessageKind {
        match self {
            Feedback::Ack(_) | Feedback::BareAck => MessageKind::Ack,
            Feedback::Nak(_) => MessageKind::Nak,
        }
    }

    fn seq(&self) -> Option<SeqNum> {
        Feedback::seq(self)
    }
}

/// 손실 채널의 송신 끝
pub struct LossyChannel<M: Transmit> {
    tx: mpsc::UnboundedSender<M>,
    model: Box<dyn LossModel>,
    attempts: HashMap<(MessageKind, Option<SeqNum>), u32>,
    dropped: u64,
    corrupted: u64,
}

/// 손실 채널 생성 (송신 끝, 수신 끝)
pub fn lossy_channel<M: Transmit>(
    model: impl LossModel + 'static,
) -> (LossyChannel<M>, mpsc::UnboundedReceiver<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LossyChannel::new(tx, model), rx)
}

impl<M: Transmit> LossyChannel<M> {
    /// 기존 큐 송신기를 손실 채널로 감쌈
    pub fn new(tx: mpsc::UnboundedSender<M>, model: impl LossModel + 'static) -> Self {
        Self::from_boxed(tx, Box::new(model))
    }

    pub fn from_boxed(tx: mpsc::UnboundedSender<M>, model: Box<dyn LossModel>) -> Self {
        Self {
            tx,
            model,
            attempts: HashMap::new(),
            dropped: 0,
            corrupted: 0,
        }
    }

    /// 메시지 전송 시도
    ///
    /// 전달되면 `Ok(true)`, 채널이 폐기하면 `Ok(false)`.
    /// 상대가 이미 종료된 경우에만 에러.
    pub fn transmit(&mut self, mut msg: M) -> Result<bool> {
        let kind = msg.kind();
        let seq = msg.seq();
        let attempt = self.attempts.entry((kind, seq)).or_insert(0);
        *attempt += 1;

        let transmission = Transmission {
            kind,
            seq,
            attempt: *attempt,
        };

        match self.model.decide(&transmission) {
            Fate::Drop => {
                self.dropped += 1;
                trace!(?kind, ?seq, attempt = transmission.attempt, "채널 손실");
                return Ok(false);
            }
            Fate::Corrupt => {
                self.corrupted += 1;
                trace!(?kind, ?seq, attempt = transmission.attempt, "채널 손상");
                msg.corrupt();
            }
            Fate::Deliver => {}
        }

        self.tx.send(msg).map_err(|_| Error::ConnectionClosed)?;
        Ok(true)
    }

    /// `seq` 미만 번호의 시도 횟수 기록 삭제
    ///
    /// 다시 보내지 않을 메시지의 기록만 지워야 함. 지운 번호를 다시 보내면 시도 1부터 셈.
    pub fn forget_below(&mut self, seq: SeqNum) {
        self.attempts
            .retain(|&(_, s), _| s.map_or(true, |s| s >= seq));
    }

    /// 폐기된 메시지 수
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// 손상된 메시지 수
    pub fn corrupted(&self) -> u64 {
        self.corrupted
    }
}

//! 프로세스 내 세션
//!
//! 송신 엔진과 수신 엔진을 두 개의 손실 채널로 연결해 한 번의 전송을 끝까지 실행.
//! 시뮬레이션과 통합 테스트의 진입점.

use bytes::{Bytes, BytesMut};
use tracing::info;

use crate::channel::{Bernoulli, LossModel, LossyChannel};
use crate::frame::{FrameStore, SeqNum};
use crate::receiver::{Delivery, Receiver};
use crate::sender::Sender;
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// 세션 결과
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// 응용 계층으로 전달된 순서 그대로의 프레임
    pub delivered: Vec<Delivery>,

    pub sender: TransferStats,

    pub receiver: TransferStats,
}

impl SessionReport {
    pub fn delivered_seqs(&self) -> Vec<SeqNum> {
        self.delivered.iter().map(|(seq, _)| *seq).collect()
    }

    /// 전달된 페이로드를 이어 붙인 원본 데이터
    pub fn reassemble(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for (_, data) in &self.delivered {
            buf.extend_from_slice(data);
        }
        buf.freeze()
    }
}

/// 손실 채널 두 개로 연결된 송신/수신 쌍
pub struct Session {
    config: Config,
    frame_loss: Box<dyn LossModel>,
    ack_loss: Box<dyn LossModel>,
}

impl Session {
    /// 설정의 전달 확률로 베르누이 손실 채널 구성
    pub fn new(config: Config) -> Self {
        let frame_loss = Bernoulli::new(config.frame_delivery_probability, config.rng_seed);
        // 두 방향이 같은 난수열을 공유하지 않도록 시드 분리
        let ack_loss = Bernoulli::new(
            config.ack_delivery_probability,
            config.rng_seed.map(|seed| seed.wrapping_add(1)),
        );
        Self::with_loss(config, frame_loss, ack_loss)
    }

    /// 손실 모델을 직접 지정
    pub fn with_loss(
        config: Config,
        frame_loss: impl LossModel + 'static,
        ack_loss: impl LossModel + 'static,
    ) -> Self {
        Self {
            config,
            frame_loss: Box::new(frame_loss),
            ack_loss: Box::new(ack_loss),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 데이터를 분할해 전송
    pub async fn transfer(self, data: &[u8]) -> Result<SessionReport> {
        let integrity = self.config.integrity.build();
        let store = FrameStore::split(data, self.config.payload_size, integrity.as_ref())?;
        self.run(store).await
    }

    /// 모든 프레임이 전달되고 확인될 때까지 실행
    pub async fn run(self, store: FrameStore) -> Result<SessionReport> {
        self.config.validate()?;
        let total_frames = store.len();

        let (frame_tx, frame_rx) = tokio::sync::mpsc::unbounded_channel();
        let (feedback_tx, feedback_rx) = tokio::sync::mpsc::unbounded_channel();
        let frame_channel = LossyChannel::from_boxed(frame_tx, self.frame_loss);
        let feedback_channel = LossyChannel::from_boxed(feedback_tx, self.ack_loss);

        let (receiver, mut deliveries) =
            Receiver::new(&self.config, total_frames, frame_rx, feedback_channel)?;
        let sender = Sender::new(&self.config, store, frame_channel, feedback_rx)?;

        info!(
            protocol = %self.config.protocol,
            frames = total_frames,
            "세션 시작"
        );

        let receiver_task = tokio::spawn(receiver.run());
        // 송신자가 끝나면 프레임 채널이 닫히고 수신자도 종료
        let sender_result = sender.run().await;
        let receiver_result = receiver_task.await?;

        let (sender_stats, receiver_stats) = match (sender_result, receiver_result) {
            (Ok(s), Ok(r)) => (s, r),
            // 수신자 실패로 피드백 채널이 닫힌 경우 원인은 수신자 쪽
            (Err(Error::ConnectionClosed), Err(e)) => return Err(e),
            (Err(e), _) | (_, Err(e)) => return Err(e),
        };

        let mut delivered = Vec::with_capacity(total_frames as usize);
        while let Some(delivery) = deliveries.recv().await {
            delivered.push(delivery);
        }

        info!("세션 완료: {} 프레임 전달", delivered.len());
        Ok(SessionReport {
            delivered,
            sender: sender_stats,
            receiver: receiver_stats,
        })
    }
}

/// 설정대로 데이터 하나를 전송하는 단축 함수
pub async fn run_session(config: Config, data: &[u8]) -> Result<SessionReport> {
    Session::new(config).transfer(data).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Perfect;
    use crate::Protocol;

    #[tokio::test(start_paused = true)]
    async fn test_perfect_link_delivers_everything() {
        let config = Config::new(Protocol::GoBackN).with_window_size(4);
        let data: Vec<u8> = (0..=255).collect();

        let report = Session::with_loss(config, Perfect, Perfect)
            .transfer(&data)
            .await
            .unwrap();

        assert_eq!(report.reassemble().as_ref(), data.as_slice());
        assert_eq!(report.sender.retransmissions, 0);
        assert_eq!(report.receiver.duplicate_frames, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_data() {
        let config = Config::new(Protocol::SelectiveRepeat);
        let report = Session::with_loss(config, Perfect, Perfect)
            .transfer(&[])
            .await
            .unwrap();
        assert!(report.delivered.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_rejected() {
        let config = Config::new(Protocol::GoBackN).with_window_size(0);
        assert!(matches!(
            run_session(config, b"abc").await,
            Err(Error::InvalidConfig(_))
        ));
    }
}

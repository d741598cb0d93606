//! # ARQ Link
//!
//! 손실 채널 위의 신뢰성 있는 프레임 전송 (Automatic Repeat reQuest)
//!
//! ## 프로토콜
//! - **Stop-and-Wait**: 프레임 하나씩, ACK 받은 뒤 다음 프레임
//! - **Go-Back-N**: 윈도우 N, 누적 ACK, 타임아웃 시 윈도우 전체 재전송
//! - **Selective-Repeat**: 윈도우 N, 개별 ACK/NAK, 손실된 프레임만 재전송
//!
//! ## 구성
//! - `channel`: 전송별 독립 손실/손상을 주입하는 손실 채널
//! - `sender` / `receiver`: I/O 없는 윈도우 상태 머신 + 비동기 액터
//! - `session`: 프로세스 내 송수신 연결 (시뮬레이션)
//! - `transport`: TCP 줄 단위 전송 (`arq-sender`, `arq-receiver`)
//!
//! 손실, 손상, 중복은 에러가 아니라 ARQ가 흡수하는 정상 상황.

pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod integrity;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stats;
pub mod timer;
pub mod transport;
pub mod wire;

pub use channel::{Bernoulli, Fate, LossModel, LossyChannel, Perfect, Scripted, Transmission};
pub use config::{Config, Protocol};
pub use error::{Error, Result};
pub use frame::{Frame, FrameStore, SeqNum};
pub use integrity::{Crc32, Integrity, InternetChecksum, Scheme};
pub use receiver::{Receiver, ReceiverWindow};
pub use sender::{Sender, SenderState, SenderWindow};
pub use session::{run_session, Session, SessionReport};
pub use stats::TransferStats;
pub use timer::{TimerKey, TimerSet};
pub use wire::{Feedback, SessionSetup};

/// 기본 프레임 페이로드 크기 (바이트)
pub const DEFAULT_PAYLOAD_SIZE: usize = 46;

/// 기본 수신측 포트
pub const DEFAULT_PORT: u16 = 9000;

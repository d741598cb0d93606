//! 에러 타입 정의
//!
//! 전송 손실, 중복, 무결성 실패는 에러가 아님 (ARQ 계층이 흡수).
//! 여기 정의된 에러는 세션을 종료시키는 치명적 상황만 표현.

use thiserror::Error;

/// ARQ 링크 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("설정 파일 파싱 에러: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("알 수 없는 프로토콜 ID: {0}")]
    UnknownProtocol(String),

    #[error("잘못된 메시지: {line:?} ({reason})")]
    MalformedMessage { line: String, reason: String },

    #[error("프로토콜 위반: {0}")]
    ProtocolViolation(String),

    #[error("재전송 한도 초과: seq={seq}, attempts={attempts}")]
    RetriesExhausted { seq: u64, attempts: u32 },

    #[error("연결 종료")]
    ConnectionClosed,

    #[error("태스크 실패: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        Error::MalformedMessage {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

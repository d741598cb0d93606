//! 프로토콜 설정

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::integrity::Scheme;
use crate::{Error, Result, DEFAULT_PAYLOAD_SIZE};

/// ARQ 프로토콜 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// Stop-and-Wait (윈도우 1)
    StopAndWait,

    /// Go-Back-N (누적 ACK)
    GoBackN,

    /// Selective-Repeat (개별 ACK/NAK)
    SelectiveRepeat,
}

impl Protocol {
    /// 세션 설정 메시지의 프로토콜 ID
    pub fn id(self) -> u8 {
        match self {
            Protocol::StopAndWait => 1,
            Protocol::GoBackN => 2,
            Protocol::SelectiveRepeat => 3,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Protocol::StopAndWait),
            2 => Ok(Protocol::GoBackN),
            3 => Ok(Protocol::SelectiveRepeat),
            other => Err(Error::UnknownProtocol(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Protocol::StopAndWait => "Stop-and-Wait",
            Protocol::GoBackN => "Go-Back-N",
            Protocol::SelectiveRepeat => "Selective-Repeat",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// ARQ 링크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 사용할 프로토콜
    pub protocol: Protocol,

    /// 윈도우 크기 N (Stop-and-Wait는 항상 1)
    pub window_size: usize,

    /// 데이터 프레임 전달 확률 (0.0 ~ 1.0]
    pub frame_delivery_probability: f64,

    /// ACK/NAK 전달 확률 (0.0 ~ 1.0]
    pub ack_delivery_probability: f64,

    /// 재전송 타이머 (밀리초)
    pub timeout_ms: u64,

    /// 시퀀스 번호 공간 크기
    pub sequence_space: u64,

    /// 프레임당 페이로드 크기 (바이트)
    pub payload_size: usize,

    /// 무결성 검사 방식
    pub integrity: Scheme,

    /// 프레임당 최대 전송 시도 횟수
    /// None이면 ACK 받을 때까지 무한 재전송
    pub max_attempts: Option<u32>,

    /// 손실 난수 시드 (재현 가능한 시뮬레이션용)
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: Protocol::GoBackN,
            window_size: 3,
            frame_delivery_probability: 0.95,
            ack_delivery_probability: 0.95,
            timeout_ms: 5000,
            sequence_space: 1 << 16,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            integrity: Scheme::Crc32,
            max_attempts: None,
            rng_seed: None,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new(protocol: Protocol) -> Self {
        Self::default().with_protocol(protocol)
    }

    /// 프로토콜 변경 (Stop-and-Wait는 윈도우 1로 고정)
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        if protocol == Protocol::StopAndWait {
            self.window_size = 1;
        }
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// 실제 적용되는 윈도우 크기
    pub fn effective_window(&self) -> usize {
        match self.protocol {
            Protocol::StopAndWait => 1,
            _ => self.window_size,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        let n = self.effective_window() as u64;
        if n == 0 {
            return Err(Error::InvalidConfig("window_size는 1 이상이어야 함".into()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeout_ms는 0보다 커야 함".into()));
        }
        if self.payload_size == 0 {
            return Err(Error::InvalidConfig("payload_size는 0보다 커야 함".into()));
        }
        for (name, p) in [
            ("frame_delivery_probability", self.frame_delivery_probability),
            ("ack_delivery_probability", self.ack_delivery_probability),
        ] {
            if !(p > 0.0 && p <= 1.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name}={p}: (0.0, 1.0] 범위여야 함"
                )));
            }
        }
        match self.protocol {
            // 송신/수신 윈도우가 겹치지 않으려면 N <= 공간/2
            Protocol::SelectiveRepeat if n * 2 > self.sequence_space => {
                Err(Error::InvalidConfig(format!(
                    "Selective-Repeat: window {} > sequence_space {} / 2",
                    n, self.sequence_space
                )))
            }
            _ if n >= self.sequence_space => Err(Error::InvalidConfig(format!(
                "window {} >= sequence_space {}",
                n, self.sequence_space
            ))),
            _ => Ok(()),
        }
    }

    /// TOML 문자열에서 설정 로드
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정 로드
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// 손실이 심한 링크용 설정
    pub fn lossy_link() -> Self {
        Self {
            frame_delivery_probability: 0.80,
            ack_delivery_probability: 0.80,
            timeout_ms: 500,
            ..Self::default()
        }
    }

    /// 안정적인 링크용 설정
    pub fn reliable_link() -> Self {
        Self {
            window_size: 8,
            frame_delivery_probability: 1.0,
            ack_delivery_probability: 1.0,
            timeout_ms: 200,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_ids() {
        for p in [Protocol::StopAndWait, Protocol::GoBackN, Protocol::SelectiveRepeat] {
            assert_eq!(Protocol::from_id(p.id()).unwrap(), p);
        }
        assert!(matches!(Protocol::from_id(4), Err(Error::UnknownProtocol(_))));
    }

    #[test]
    fn test_stop_and_wait_forces_window_one() {
        let config = Config::new(Protocol::StopAndWait).with_window_size(8);
        assert_eq!(config.effective_window(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_selective_repeat_window_bound() {
        let mut config = Config::new(Protocol::SelectiveRepeat).with_window_size(5);
        config.sequence_space = 8;
        assert!(config.validate().is_err());

        config.window_size = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_probability() {
        let mut config = Config::default();
        config.frame_delivery_probability = 0.0;
        assert!(config.validate().is_err());

        config.frame_delivery_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_timeout_saturates() {
        let config = Config::default().with_timeout(Duration::MAX);
        assert_eq!(config.timeout_ms, u64::MAX);

        let config = Config::default().with_timeout(Duration::from_micros(1500));
        assert_eq!(config.timeout_ms, 1);
    }

    #[test]
    fn test_link_presets_are_valid() {
        let lossy = Config::lossy_link();
        assert!(lossy.validate().is_ok());
        assert!(lossy.frame_delivery_probability < 1.0);
        assert_eq!(lossy.timeout(), Duration::from_millis(500));

        let reliable = Config::reliable_link();
        assert!(reliable.validate().is_ok());
        assert_eq!(reliable.ack_delivery_probability, 1.0);
    }

    #[test]
    fn test_toml_loading() {
        let config = Config::from_toml_str(
            r#"
            protocol = "selective-repeat"
            window_size = 4
            timeout_ms = 250
            max_attempts = 10
            integrity = "checksum16"
            "#,
        )
        .unwrap();

        assert_eq!(config.protocol, Protocol::SelectiveRepeat);
        assert_eq!(config.window_size, 4);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.max_attempts, Some(10));
        assert_eq!(config.integrity, Scheme::Checksum16);
        // 지정하지 않은 필드는 기본값
        assert_eq!(config.payload_size, DEFAULT_PAYLOAD_SIZE);
    }
}

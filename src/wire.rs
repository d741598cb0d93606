//! 와이어 메시지 정의
//!
//! 줄 단위 텍스트 인코딩:
//! - 세션 설정: `<protocol_id>` 다음 줄 `<total_frame_count>`
//! - 데이터 프레임: `<seq>:<payload hex>`
//! - ACK: `ACK:<k>` (Stop-and-Wait는 번호 없는 `ACK`)
//! - NAK: `NAK:<k>` (Selective-Repeat 전용)

use bytes::Bytes;

use crate::config::Protocol;
use crate::frame::{Frame, SeqNum};
use crate::{Error, Result};

/// 수신자 → 송신자 피드백
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    /// ACK(k): 누적(SAW/GBN) 또는 개별(SR) 확인
    Ack(SeqNum),

    /// 번호 없는 ACK (Stop-and-Wait 와이어 형식)
    /// 현재 전송 중인 유일한 프레임을 확인
    BareAck,

    /// NAK(k): 프레임 k 재전송 요청
    Nak(SeqNum),
}

impl Feedback {
    pub fn seq(&self) -> Option<SeqNum> {
        match *self {
            Feedback::Ack(k) | Feedback::Nak(k) => Some(k),
            Feedback::BareAck => None,
        }
    }

    /// 프로토콜에 맞는 와이어 형식으로 인코딩
    pub fn to_line(&self, protocol: Protocol) -> String {
        match (*self, protocol) {
            (Feedback::Ack(_), Protocol::StopAndWait) | (Feedback::BareAck, _) => "ACK".to_string(),
            (Feedback::Ack(k), _) => format!("ACK:{k}"),
            (Feedback::Nak(k), _) => format!("NAK:{k}"),
        }
    }

    pub fn from_line(line: &str) -> Result<Self> {
        let line = line.trim();
        if line == "ACK" {
            return Ok(Feedback::BareAck);
        }

        let (tag, num) = line
            .split_once(':')
            .ok_or_else(|| Error::malformed(line, "':' 구분자 없음"))?;
        let k = parse_seq(line, num)?;

        match tag {
            "ACK" => Ok(Feedback::Ack(k)),
            "NAK" => Ok(Feedback::Nak(k)),
            other => Err(Error::malformed(line, format!("알 수 없는 태그 {other:?}"))),
        }
    }
}

impl std::fmt::Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Ack(k) => write!(f, "ACK({k})"),
            Feedback::BareAck => f.write_str("ACK"),
            Feedback::Nak(k) => write!(f, "NAK({k})"),
        }
    }
}

/// 세션 설정 메시지 (송신자 → 수신자, 연결 직후 1회)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSetup {
    pub protocol: Protocol,
    pub total_frames: u64,
}

impl SessionSetup {
    pub fn new(protocol: Protocol, total_frames: u64) -> Self {
        Self {
            protocol,
            total_frames,
        }
    }

    /// 두 줄로 인코딩
    pub fn to_lines(&self) -> [String; 2] {
        [self.protocol.id().to_string(), self.total_frames.to_string()]
    }

    pub fn from_lines(protocol_line: &str, total_line: &str) -> Result<Self> {
        let protocol_line = protocol_line.trim();
        let id: u8 = protocol_line
            .parse()
            .map_err(|_| Error::UnknownProtocol(protocol_line.to_string()))?;
        let protocol = Protocol::from_id(id)?;

        let total_line = total_line.trim();
        let total_frames = total_line
            .parse()
            .map_err(|_| Error::malformed(total_line, "프레임 수가 숫자가 아님"))?;

        Ok(Self {
            protocol,
            total_frames,
        })
    }
}

/// 데이터 프레임 인코딩
pub fn frame_to_line(frame: &Frame) -> String {
    format!("{}:{}", frame.seq, hex::encode(&frame.payload))
}

/// 데이터 프레임 디코딩
pub fn frame_from_line(line: &str) -> Result<Frame> {
    let line = line.trim();
    let (num, payload) = line
        .split_once(':')
        .ok_or_else(|| Error::malformed(line, "':' 구분자 없음"))?;
    let seq = parse_seq(line, num)?;
    let payload = hex::decode(payload)
        .map_err(|e| Error::malformed(line, format!("페이로드 hex 디코딩 실패: {e}")))?;

    Ok(Frame::new(seq, Bytes::from(payload)))
}

fn parse_seq(line: &str, num: &str) -> Result<SeqNum> {
    num.parse()
        .map_err(|_| Error::malformed(line, format!("시퀀스 번호 {num:?} 파싱 실패")))
}

//! 무결성 검사
//!
//! 페이로드 뒤에 체크 값을 붙이고(seal), 수신측에서 손상 여부만 판단(open).
//! ARQ 계층에서는 손상된 프레임 = 손실된 프레임으로 취급.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// 무결성 검사 방식
pub trait Integrity: Send + Sync {
    /// 방식 이름 (로그용)
    fn name(&self) -> &'static str;

    /// 페이로드에 체크 값을 붙여 반환
    fn seal(&self, data: &[u8]) -> Bytes;

    /// 체크 값을 검증하고 원본 페이로드 반환 (손상 시 None)
    fn open(&self, tagged: &[u8]) -> Option<Bytes>;

    /// 손상 여부만 확인
    fn is_intact(&self, tagged: &[u8]) -> bool {
        self.open(tagged).is_some()
    }
}

/// 설정에서 선택하는 무결성 검사 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scheme {
    #[default]
    Crc32,
    Checksum16,
}

impl Scheme {
    pub fn build(self) -> Arc<dyn Integrity> {
        match self {
            Scheme::Crc32 => Arc::new(Crc32),
            Scheme::Checksum16 => Arc::new(InternetChecksum),
        }
    }
}

/// CRC-32 (IEEE) 4바이트 트레일러
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32;

impl Integrity for Crc32 {
    fn name(&self) -> &'static str {
        "crc32"
    }

    fn seal(&self, data: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(data.len() + 4);
        buf.put_slice(data);
        buf.put_u32(crc32fast::hash(data));
        buf.freeze()
    }

    fn open(&self, tagged: &[u8]) -> Option<Bytes> {
        if tagged.len() < 4 {
            return None;
        }
        let (data, trailer) = tagged.split_at(tagged.len() - 4);
        let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        (crc32fast::hash(data) == expected).then(|| Bytes::copy_from_slice(data))
    }
}

/// 16비트 1의 보수 합 체크섬 (인터넷 체크섬) 2바이트 트레일러
#[derive(Debug, Clone, Copy, Default)]
pub struct InternetChecksum;

impl InternetChecksum {
    /// 16비트 워드 단위 1의 보수 합의 보수
    pub fn checksum(data: &[u8]) -> u16 {
        let mut sum: u32 = 0;
        for word in data.chunks(2) {
            let value = match word {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                [hi] => u16::from_be_bytes([*hi, 0]),
                _ => 0,
            };
            sum += value as u32;
            // carry wrap-around
            if sum & 0x1_0000 != 0 {
                sum = (sum & 0xFFFF) + 1;
            }
        }
        !(sum as u16)
    }
}

impl Integrity for InternetChecksum {
    fn name(&self) -> &'static str {
        "checksum16"
    }

    fn seal(&self, data: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(data.len() + 2);
        buf.put_slice(data);
        buf.put_u16(Self::checksum(data));
        buf.freeze()
    }

    fn open(&self, tagged: &[u8]) -> Option<Bytes> {
        if tagged.len() < 2 {
            return None;
        }
        let (data, trailer) = tagged.split_at(tagged.len() - 2);
        let expected = u16::from_be_bytes([trailer[0], trailer[1]]);
        (Self::checksum(data) == expected).then(|| Bytes::copy_from_slice(data))
    }
}

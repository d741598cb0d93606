//! 프레임과 프레임 저장소
//!
//! - Frame: 시퀀스 번호 + 무결성 태그가 붙은 페이로드 (불변)
//! - FrameStore: 전송할 프레임 목록 (생성 후 읽기 전용)

use std::path::Path;

use bytes::Bytes;

use crate::integrity::Integrity;
use crate::{Error, Result};

/// 시퀀스 번호 (0부터 단조 증가)
pub type SeqNum = u64;

/// 데이터 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 시퀀스 번호
    pub seq: SeqNum,

    /// 무결성 태그가 붙은 페이로드
    pub payload: Bytes,
}

impl Frame {
    pub fn new(seq: SeqNum, payload: Bytes) -> Self {
        Self { seq, payload }
    }

    /// 페이로드 비트 하나 반전 (채널 손상 시뮬레이션)
    pub fn corrupt(&mut self) {
        let mut data = self.payload.to_vec();
        if let Some(byte) = data.first_mut() {
            *byte ^= 0x01;
        }
        self.payload = Bytes::from(data);
    }
}

/// 전송할 프레임 저장소
#[derive(Debug, Clone, Default)]
pub struct FrameStore {
    frames: Vec<Frame>,
}

impl FrameStore {
    /// 데이터를 고정 크기 단위로 분할하고 각각 무결성 태그 부착
    ///
    /// 마지막 프레임은 `payload_size`보다 짧을 수 있음.
    pub fn split(data: &[u8], payload_size: usize, integrity: &dyn Integrity) -> Result<Self> {
        if payload_size == 0 {
            return Err(Error::InvalidConfig("payload_size는 0보다 커야 함".into()));
        }

        let frames = data
            .chunks(payload_size)
            .enumerate()
            .map(|(idx, unit)| Frame::new(idx as SeqNum, integrity.seal(unit)))
            .collect();

        Ok(Self { frames })
    }

    /// 파일 내용으로 저장소 생성
    pub fn from_file(
        path: impl AsRef<Path>,
        payload_size: usize,
        integrity: &dyn Integrity,
    ) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::split(&data, payload_size, integrity)
    }

    /// 이미 만들어진 단위 데이터 목록으로 저장소 생성
    pub fn from_units<I, B>(units: I, integrity: &dyn Integrity) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let frames = units
            .into_iter()
            .enumerate()
            .map(|(idx, unit)| Frame::new(idx as SeqNum, integrity.seal(unit.as_ref())))
            .collect();

        Self { frames }
    }

    pub fn get(&self, seq: SeqNum) -> Option<&Frame> {
        usize::try_from(seq).ok().and_then(|idx| self.frames.get(idx))
    }

    /// 총 프레임 수
    pub fn len(&self) -> u64 {
        self.frames.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::Crc32;
    use std::io::Write;

    #[test]
    fn test_split_into_frames() {
        let data: Vec<u8> = (0..100).collect();
        let store = FrameStore::split(&data, 46, &Crc32).unwrap();

        assert_eq!(store.len(), 3);
        for (idx, frame) in store.iter().enumerate() {
            assert_eq!(frame.seq, idx as u64);
            assert!(Crc32.is_intact(&frame.payload));
        }

        let last = Crc32.open(&store.get(2).unwrap().payload).unwrap();
        assert_eq!(last.as_ref(), &data[92..]);
        assert!(store.get(3).is_none());
    }

    #[test]
    fn test_zero_payload_size_rejected() {
        assert!(FrameStore::split(b"abc", 0, &Crc32).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"The quick brown fox jumps over the lazy dog.")
            .unwrap();

        let store = FrameStore::from_file(file.path(), 10, &Crc32).unwrap();
        assert_eq!(store.len(), 5);

        let first = Crc32.open(&store.get(0).unwrap().payload).unwrap();
        assert_eq!(first.as_ref(), b"The quick ");
    }

    #[test]
    fn test_corrupt_breaks_integrity() {
        let store = FrameStore::from_units(["frame-0"], &Crc32);
        let mut frame = store.get(0).unwrap().clone();
        frame.corrupt();
        assert!(!Crc32.is_intact(&frame.payload));
    }
}

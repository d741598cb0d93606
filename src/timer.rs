//! 재전송 타이머
//!
//! 키별 취소 가능한 카운트다운. 백그라운드 태스크 없이 마감 시각만 보관하고
//! `expired()`가 가장 이른 마감까지 대기. 취소된 타이머는 맵에서 사라지므로
//! 취소 이후 뒤늦게 만료 이벤트가 발생하는 일이 없음.
//!
//! - Stop-and-Wait / Go-Back-N: `TimerKey::Window` 하나
//! - Selective-Repeat: 프레임마다 `TimerKey::Frame(seq)`

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use crate::frame::SeqNum;

/// 타이머 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKey {
    /// 윈도우 전체 타이머
    Window,

    /// 개별 프레임 타이머
    Frame(SeqNum),
}

/// 키별 타이머 모음
#[derive(Debug)]
pub struct TimerSet<K: Ord + Copy = TimerKey> {
    deadlines: BTreeMap<K, Instant>,
}

impl<K: Ord + Copy> Default for TimerSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy> TimerSet<K> {
    pub fn new() -> Self {
        Self {
            deadlines: BTreeMap::new(),
        }
    }

    /// 타이머 시작 (이미 동작 중이면 그대로 유지)
    pub fn arm(&mut self, key: K, duration: Duration) {
        self.deadlines
            .entry(key)
            .or_insert_with(|| Instant::now() + duration);
    }

    /// 타이머 재시작 (동작 여부와 관계없이 지금부터 다시 카운트)
    pub fn reset(&mut self, key: K, duration: Duration) {
        self.deadlines.insert(key, Instant::now() + duration);
    }

    /// 타이머 취소 (이미 취소/만료된 경우 아무 일도 없음)
    pub fn cancel(&mut self, key: K) -> bool {
        self.deadlines.remove(&key).is_some()
    }

    /// 모든 타이머 취소
    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_armed(&self, key: K) -> bool {
        self.deadlines.contains_key(&key)
    }

    /// 동작 중인 타이머 수
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// 가장 이른 마감 (동률이면 키 순서상 앞선 것)
    pub fn next_deadline(&self) -> Option<(K, Instant)> {
        self.deadlines
            .iter()
            .min_by_key(|(_, deadline)| **deadline)
            .map(|(key, deadline)| (*key, *deadline))
    }

    /// 다음 타이머 만료까지 대기하고 만료된 키 반환
    ///
    /// 동작 중인 타이머가 없으면 영원히 대기. 완료 전에 drop되면
    /// 상태는 바뀌지 않으므로 `tokio::select!` 분기로 안전하게 사용 가능.
    pub async fn expired(&mut self) -> K {
        match self.next_deadline() {
            Some((key, deadline)) => {
                sleep_until(deadline).await;
                self.deadlines.remove(&key);
                key
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_duration() {
        let mut timers = TimerSet::new();
        let start = Instant::now();
        timers.arm(TimerKey::Window, TIMEOUT);

        assert_eq!(timers.expired().await, TimerKey::Window);
        assert!(start.elapsed() >= TIMEOUT);
        assert!(!timers.is_armed(TimerKey::Window));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let mut timers = TimerSet::new();
        timers.arm(TimerKey::Frame(1), TIMEOUT);
        timers.arm(TimerKey::Frame(2), TIMEOUT * 2);

        assert!(timers.cancel(TimerKey::Frame(1)));
        // 중복 취소는 no-op
        assert!(!timers.cancel(TimerKey::Frame(1)));

        assert_eq!(timers.expired().await, TimerKey::Frame(2));
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_keeps_running_timer_reset_restarts() {
        let mut timers = TimerSet::new();
        timers.arm(TimerKey::Window, TIMEOUT);
        let first = timers.next_deadline().unwrap().1;

        tokio::time::advance(Duration::from_millis(40)).await;
        timers.arm(TimerKey::Window, TIMEOUT);
        assert_eq!(timers.next_deadline().unwrap().1, first);

        timers.reset(TimerKey::Window, TIMEOUT);
        assert_eq!(
            timers.next_deadline().unwrap().1,
            first + Duration::from_millis(40)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_is_cancel_safe() {
        let mut timers = TimerSet::new();
        timers.arm(TimerKey::Frame(0), TIMEOUT);

        // 만료 전에 다른 분기가 먼저 완료되어도 타이머는 유지됨
        tokio::select! {
            biased;
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
            _ = timers.expired() => panic!("아직 만료되면 안 됨"),
        }
        assert!(timers.is_armed(TimerKey::Frame(0)));

        timers.cancel_all();
        assert!(timers.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_deadline_first() {
        let mut timers = TimerSet::new();
        timers.arm(TimerKey::Frame(5), TIMEOUT * 3);
        timers.arm(TimerKey::Frame(3), TIMEOUT);
        timers.arm(TimerKey::Frame(4), TIMEOUT * 2);

        assert_eq!(timers.expired().await, TimerKey::Frame(3));
        assert_eq!(timers.expired().await, TimerKey::Frame(4));
        assert_eq!(timers.expired().await, TimerKey::Frame(5));
    }
}

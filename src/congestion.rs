//! AIMD 혼잡 제어
//!
//! 혼잡 윈도우(cwnd)는 ACK 대기 큐 앞에서부터 한 번의 update에서
//! 살펴볼 프레임 수의 상한이다.

/// 혼잡 제어 이벤트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionEvent {
    /// 프레임 ACK 확인
    AckOk,

    /// 재전송 타임아웃
    AckTimeout,

    /// 선택적 ACK 기반 빠른 재전송
    FastResend,

    /// 소켓 송신 실패
    SendFailed,
}

/// 혼잡 윈도우 제어기
#[derive(Debug, Clone)]
pub struct CongestionController {
    cwnd: u32,
    ssthresh: u32,
    min_cwnd: u32,
    max_cwnd: u32,
}

impl CongestionController {
    pub fn new(min_cwnd: u32, default_cwnd: u32, max_cwnd: u32) -> Self {
        let initial = default_cwnd.clamp(min_cwnd, max_cwnd);
        Self {
            cwnd: initial,
            ssthresh: initial,
            min_cwnd,
            max_cwnd,
        }
    }

    /// 이벤트 반영
    pub fn on_event(&mut self, event: CongestionEvent) {
        match event {
            CongestionEvent::AckOk => {
                if self.cwnd < self.ssthresh {
                    // 슬로우 스타트
                    self.cwnd = self.cwnd.saturating_mul(2);
                } else {
                    self.cwnd = self.cwnd.saturating_add(1);
                }
            }
            CongestionEvent::AckTimeout | CongestionEvent::SendFailed => {
                self.ssthresh = (self.cwnd / 2).max(self.min_cwnd);
                self.cwnd = self.min_cwnd;
            }
            CongestionEvent::FastResend => {
                self.ssthresh = (self.cwnd / 2).max(self.min_cwnd);
                self.cwnd = self.ssthresh;
            }
        }
        self.cwnd = self.cwnd.clamp(self.min_cwnd, self.max_cwnd);
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_window() {
        let cc = CongestionController::new(16, 32, 64);
        assert_eq!(cc.cwnd(), 32);
        assert_eq!(cc.ssthresh(), 32);
    }

    #[test]
    fn test_additive_increase_to_max() {
        let mut cc = CongestionController::new(16, 32, 64);
        cc.on_event(CongestionEvent::AckOk);
        assert_eq!(cc.cwnd(), 33);
        for _ in 0..100 {
            cc.on_event(CongestionEvent::AckOk);
        }
        assert_eq!(cc.cwnd(), 64);
    }

    #[test]
    fn test_timeout_collapses_then_slow_start() {
        let mut cc = CongestionController::new(16, 32, 64);
        for _ in 0..8 {
            cc.on_event(CongestionEvent::AckOk);
        }
        assert_eq!(cc.cwnd(), 40);

        cc.on_event(CongestionEvent::AckTimeout);
        assert_eq!(cc.cwnd(), 16);
        assert_eq!(cc.ssthresh(), 20);

        // 16 < 20 이므로 두 배
        cc.on_event(CongestionEvent::AckOk);
        assert_eq!(cc.cwnd(), 32);
        cc.on_event(CongestionEvent::AckOk);
        assert_eq!(cc.cwnd(), 33);
    }

    #[test]
    fn test_fast_resend_halves() {
        let mut cc = CongestionController::new(16, 32, 64);
        cc.on_event(CongestionEvent::FastResend);
        assert_eq!(cc.cwnd(), 16);
        assert_eq!(cc.ssthresh(), 16);

        cc.on_event(CongestionEvent::FastResend);
        assert_eq!(cc.cwnd(), 16);
    }

    #[test]
    fn test_send_failed_behaves_like_timeout() {
        let mut a = CongestionController::new(4, 32, 64);
        let mut b = a.clone();
        a.on_event(CongestionEvent::SendFailed);
        b.on_event(CongestionEvent::AckTimeout);
        assert_eq!(a.cwnd(), b.cwnd());
        assert_eq!(a.ssthresh(), b.ssthresh());
        assert_eq!(a.cwnd(), 4);
        assert_eq!(a.ssthresh(), 16);
    }

    #[test]
    fn test_window_always_in_bounds() {
        let mut cc = CongestionController::new(16, 32, 64);
        let events = [
            CongestionEvent::AckOk,
            CongestionEvent::FastResend,
            CongestionEvent::AckOk,
            CongestionEvent::AckTimeout,
            CongestionEvent::SendFailed,
        ];
        for i in 0..500 {
            cc.on_event(events[(i * 7) % events.len()]);
            assert!((16..=64).contains(&cc.cwnd()));
        }
    }
}

//! RTT 추정과 재전송 타임아웃(RTO) 계산
//!
//! 재전송된 프레임의 ACK는 어느 전송에 대한 것인지 모호하므로
//! 호출측이 타임아웃 재전송 프레임을 샘플에서 제외한다.

use std::time::Duration;

/// RTT 추정기
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// 최근 샘플
    latest: Duration,

    /// 평활 RTT (샘플이 없으면 None)
    smoothed: Option<Duration>,

    /// 평활 편차
    deviation: Duration,

    rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
}

impl RttEstimator {
    pub fn new(min_rto: Duration, max_rto: Duration) -> Self {
        Self {
            latest: Duration::ZERO,
            smoothed: None,
            deviation: Duration::ZERO,
            rto: min_rto,
            min_rto,
            max_rto,
        }
    }

    /// RTT 샘플 반영
    pub fn on_sample(&mut self, sample: Duration) {
        self.latest = sample;

        let (smoothed, deviation) = match self.smoothed {
            None => (sample, sample / 2),
            Some(prev) => {
                let smoothed = (prev * 7 + sample) / 8;
                let diff = if sample > smoothed {
                    sample - smoothed
                } else {
                    smoothed - sample
                };
                (smoothed, (self.deviation * 3 + diff) / 4)
            }
        };

        self.smoothed = Some(smoothed);
        self.deviation = deviation;
        self.rto = (smoothed + deviation * 4).clamp(self.min_rto, self.max_rto);
    }

    /// 타임아웃 재전송 시 RTO를 50% 늘림 (상한 고정)
    ///
    /// 이미 상한이었으면 `true`를 반환한다.
    pub fn backoff(&mut self) -> bool {
        let at_max = self.rto >= self.max_rto;
        self.rto = (self.rto + self.rto / 2).min(self.max_rto);
        at_max
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn latest(&self) -> Duration {
        self.latest
    }

    pub fn smoothed(&self) -> Option<Duration> {
        self.smoothed
    }

    pub fn deviation(&self) -> Duration {
        self.deviation
    }

    pub fn max_rto(&self) -> Duration {
        self.max_rto
    }
}

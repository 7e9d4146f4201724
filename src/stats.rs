//! 전송 통계

use std::time::Duration;

use tokio::time::Instant;

/// 전송 카운터
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 집계 시작 시간
    pub start_time: Instant,

    /// ACK 확인된 페이로드 바이트
    pub send_bytes: u64,

    /// 애플리케이션으로 넘긴 바이트
    pub recv_bytes: u64,

    /// 최초 전송 프레임 수
    pub send_first: u64,

    /// 백프레셔로 거절된 send 호출 수
    pub send_failed: u64,

    /// 윈도우 QUERY 전송 수
    pub send_query: u64,

    /// 타임아웃 재전송 수
    pub resend_rto: u64,

    /// 빠른 재전송 수
    pub resend_fast: u64,

    /// RTO가 상한인 상태에서 재전송한 수
    pub reach_max_rto: u64,

    /// FEC 미적용 송신 프레임
    pub fec_tx_short: u64,

    /// FEC 그룹 송신 프레임
    pub fec_tx_full: u64,

    /// FEC 미적용 수신 프레임
    pub fec_rx_short: u64,

    /// FEC 그룹 수신 프레임
    pub fec_rx_full: u64,

    /// FEC 복구 성공
    pub fec_ok: u64,

    /// FEC 복구 실패
    pub fec_failed: u64,

    /// 형식이 잘못된 데이터그램
    pub malformed_datagrams: u64,

    /// 연결된 피어가 아닌 주소에서 온 데이터그램
    pub foreign_datagrams: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            send_bytes: 0,
            recv_bytes: 0,
            send_first: 0,
            send_failed: 0,
            send_query: 0,
            resend_rto: 0,
            resend_fast: 0,
            reach_max_rto: 0,
            fec_tx_short: 0,
            fec_tx_full: 0,
            fec_rx_short: 0,
            fec_rx_full: 0,
            fec_ok: 0,
            fec_failed: 0,
            malformed_datagrams: 0,
            foreign_datagrams: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 최초 전송 대비 재전송 비율 (%)
    pub fn resend_ratio(&self) -> u64 {
        100 * (self.resend_rto + self.resend_fast) / self.send_first.max(1)
    }

    /// FEC 복구 성공률 (%)
    pub fn fec_recovery_ratio(&self) -> u64 {
        100 * self.fec_ok / (self.fec_ok + self.fec_failed).max(1)
    }

    /// qos 샘플 간 재전송 카운터 초기화
    pub fn reset_resend(&mut self) {
        self.resend_rto = 0;
        self.resend_fast = 0;
        self.reach_max_rto = 0;
    }

    /// 전체 초기화
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        let secs = self.elapsed().as_secs().max(1);
        format!(
            "Elapsed: {}s | Sent: {} B ({} B/s) | Recv: {} B ({} B/s) | First: {} | Resend rto/fast/max: {}/{}/{} ({}%) | Query: {} | Failed: {} | FEC tx {}/{} rx {}/{} ok {} fail {} | Dropped: {} malformed, {} foreign",
            secs,
            self.send_bytes,
            self.send_bytes / secs,
            self.recv_bytes,
            self.recv_bytes / secs,
            self.send_first,
            self.resend_rto,
            self.resend_fast,
            self.reach_max_rto,
            self.resend_ratio(),
            self.send_query,
            self.send_failed,
            self.fec_tx_short,
            self.fec_tx_full,
            self.fec_rx_short,
            self.fec_rx_full,
            self.fec_ok,
            self.fec_failed,
            self.malformed_datagrams,
            self.foreign_datagrams,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

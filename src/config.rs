//! 프로토콜 설정

use std::time::Duration;

use crate::frame::{FEC_TRAILER_SIZE, FRAME_HEADER_SIZE, MAX_FEC_REDUNDANCY, MIN_FEC_REDUNDANCY};
use crate::{Error, Result, DEFAULT_MSS};

/// UDP 페이로드 최대 크기 (IPv4 기준)
const MAX_UDP_PAYLOAD: usize = 65507;

/// 전송 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// 주소에 바인드하고 처음 들어온 피어를 학습
    Server,

    /// 임의 포트에서 서버 주소로 송신
    Client,
}

/// FFRDP 전송 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 프레임당 최대 페이로드 (바이트)
    pub mss: usize,

    /// 최소 재전송 타임아웃
    pub min_rto: Duration,

    /// 최대 재전송 타임아웃
    pub max_rto: Duration,

    /// ACK 대기 중인 최대 프레임 수
    pub max_wait_snd: usize,

    /// 피어 수신 윈도우가 0일 때 QUERY 전송 주기
    pub query_cycle: Duration,

    /// 채워지지 않은 프레임을 강제로 큐에 넣기까지의 유휴 시간
    pub flush_timeout: Duration,

    /// 피어 사망 판정 타임아웃
    pub dead_timeout: Duration,

    /// 혼잡 윈도우 하한 (프레임)
    pub min_cwnd: u32,

    /// 혼잡 윈도우 초기값 (프레임)
    pub default_cwnd: u32,

    /// 혼잡 윈도우 상한 (프레임)
    pub max_cwnd: u32,

    /// 수신 링버퍼 크기 (바이트)
    pub recv_buffer_size: usize,

    /// 커널 UDP 송신 버퍼 크기
    pub udp_send_buffer: usize,

    /// 커널 UDP 수신 버퍼 크기
    pub udp_recv_buffer: usize,

    /// update 한 번에 소켓 readable을 기다리는 최대 시간
    pub poll_timeout: Duration,

    /// FEC 그룹 크기 (0 = 비활성, 3 ~ 63)
    /// 그룹마다 R-1개의 데이터 프레임 + 1개의 패리티 프레임
    pub fec_redundancy: u8,
}

impl Default for Config {
    fn default() -> Self {
        let mss = DEFAULT_MSS;
        Self {
            mss,
            min_rto: Duration::from_millis(50),
            max_rto: Duration::from_millis(1000),
            max_wait_snd: 2048,
            query_cycle: Duration::from_millis(500),
            flush_timeout: Duration::from_millis(500),
            dead_timeout: Duration::from_millis(5000),
            min_cwnd: 16,
            default_cwnd: 32,
            max_cwnd: 64,
            recv_buffer_size: 128 * mss,
            udp_send_buffer: 64 * (mss + 6),
            udp_recv_buffer: 128 * (mss + 6),
            poll_timeout: Duration::from_millis(10),
            fec_redundancy: 0,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// FEC 그룹 크기 지정
    pub fn with_fec(mut self, redundancy: u8) -> Self {
        self.fec_redundancy = redundancy;
        self
    }

    /// 저지연 스트리밍용 설정
    pub fn low_latency() -> Self {
        Self {
            min_rto: Duration::from_millis(30),
            max_rto: Duration::from_millis(500),
            max_wait_snd: 512,
            flush_timeout: Duration::from_millis(20),
            dead_timeout: Duration::from_millis(3000),
            poll_timeout: Duration::from_millis(5),
            ..Self::default()
        }
    }

    /// 손실이 많은 네트워크용 설정 (FEC 활성)
    pub fn lossy_network() -> Self {
        Self {
            max_rto: Duration::from_millis(2000),
            dead_timeout: Duration::from_millis(10000),
            min_cwnd: 8,
            fec_redundancy: 4,
            ..Self::default()
        }
    }

    /// FEC 활성 여부
    pub fn fec_enabled(&self) -> bool {
        self.fec_redundancy != 0
    }

    /// 데이터 프레임 최대 크기 (헤더 + MSS + FEC 트레일러)
    pub fn max_datagram_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.mss + FEC_TRAILER_SIZE
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.mss == 0 || self.max_datagram_size() > MAX_UDP_PAYLOAD {
            return Err(Error::InvalidConfig(format!("mss {} 범위 초과", self.mss)));
        }
        if self.min_rto.is_zero() || self.min_rto > self.max_rto {
            return Err(Error::InvalidConfig(format!(
                "rto 범위 오류: min {:?}, max {:?}",
                self.min_rto, self.max_rto
            )));
        }
        if self.min_cwnd == 0
            || self.min_cwnd > self.default_cwnd
            || self.default_cwnd > self.max_cwnd
        {
            return Err(Error::InvalidConfig(format!(
                "cwnd 범위 오류: {} <= {} <= {}",
                self.min_cwnd, self.default_cwnd, self.max_cwnd
            )));
        }
        if self.max_wait_snd == 0 {
            return Err(Error::InvalidConfig("max_wait_snd는 0일 수 없음".into()));
        }
        if self.recv_buffer_size < self.mss {
            return Err(Error::InvalidConfig(format!(
                "수신 버퍼 {} < mss {}",
                self.recv_buffer_size, self.mss
            )));
        }
        // 1, 2는 ACK/QUERY 타입 바이트와 겹침
        if self.fec_redundancy != 0
            && !(MIN_FEC_REDUNDANCY..=MAX_FEC_REDUNDANCY).contains(&self.fec_redundancy)
        {
            return Err(Error::InvalidConfig(format!(
                "fec_redundancy {}: 0 또는 {}~{}",
                self.fec_redundancy, MIN_FEC_REDUNDANCY, MAX_FEC_REDUNDANCY
            )));
        }
        Ok(())
    }
}

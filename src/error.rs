//! 에러 타입 정의

use thiserror::Error;

/// FFRDP 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    /// 서버 모드에서 아직 클라이언트 주소를 모름
    #[error("연결된 피어 없음")]
    NotConnected,

    /// 송신 큐 한도 초과 (나중에 재시도)
    #[error("송신 큐 가득 참: 필요 {needed} + 대기 {queued} > 한도 {limit}")]
    SendQueueFull {
        needed: usize,
        queued: usize,
        limit: usize,
    },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("유효하지 않은 패킷 태그: {0:#04x}")]
    InvalidPacketTag(u8),

    #[error("패킷 길이 초과: {len} bytes")]
    PacketTooLarge { len: usize },
}

impl Error {
    /// 재시도하면 성공할 수 있는 일시적 백프레셔인지 여부
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Error::NotConnected | Error::SendQueueFull { .. })
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

//! 프레임 정의와 와이어 포맷
//!
//! ```text
//! 데이터 프레임:  [type:8 | seq:24] (LE u32) + payload (<= MSS) [+ fec_seq (LE u16)]
//! ACK 프레임:    [1 | una:24] (LE u32) + [mask:24 | wnd:8] (LE u32)   = 8 bytes
//! QUERY 프레임:  [2]                                                   = 1 byte
//! ```
//!
//! type 0은 FEC 그룹이 없는 프레임, 3 ~ 63은 FEC 그룹 크기를 뜻한다.
//! FEC 트레일러는 꽉 찬 (MSS 크기) 프레임에만 붙는다.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::time::Instant;

use crate::seq::SEQ_MASK;

/// 데이터 프레임 헤더 크기
pub const FRAME_HEADER_SIZE: usize = 4;

/// FEC 시퀀스 트레일러 크기
pub const FEC_TRAILER_SIZE: usize = 2;

/// ACK 프레임 크기
pub const ACK_FRAME_SIZE: usize = 8;

/// 선택적 ACK 비트마스크가 덮는 시퀀스 수
pub const ACK_MASK_BITS: i32 = 24;

/// 그룹 없는 데이터 프레임 타입
pub const FRAME_TYPE_PLAIN: u8 = 0;

/// ACK 프레임 타입
pub const FRAME_TYPE_ACK: u8 = 1;

/// QUERY 프레임 타입
pub const FRAME_TYPE_QUERY: u8 = 2;

/// FEC 그룹 크기 하한
pub const MIN_FEC_REDUNDANCY: u8 = 3;

/// FEC 그룹 크기 상한
pub const MAX_FEC_REDUNDANCY: u8 = 63;

/// 첫 바이트로 판별한 프레임 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// 데이터 프레임 (FEC 그룹 크기, 0 = 그룹 없음)
    Data(u8),
    Ack,
    Query,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            FRAME_TYPE_ACK => Some(FrameType::Ack),
            FRAME_TYPE_QUERY => Some(FrameType::Query),
            FRAME_TYPE_PLAIN => Some(FrameType::Data(0)),
            MIN_FEC_REDUNDANCY..=MAX_FEC_REDUNDANCY => Some(FrameType::Data(byte)),
            _ => None,
        }
    }
}

/// 헤더 패킹: 하위 8비트 타입, 상위 24비트 시퀀스
#[inline]
pub fn pack_header(frame_type: u8, seq: u32) -> u32 {
    frame_type as u32 | ((seq & SEQ_MASK) << 8)
}

/// 데이터그램 앞 4바이트에서 시퀀스 추출
#[inline]
pub fn header_seq(datagram: &[u8]) -> u32 {
    u32::from_le_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]) >> 8
}

/// 프레임 재전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// 아직 한 번도 보내지 않음
    Fresh,

    /// 전송됨, ACK 대기
    Sent,

    /// 다음 update에서 빠른 재전송
    ///
    /// 표시 전에 타임아웃 재전송된 프레임이면 `after_timeout`이 유지되고,
    /// 빠른 재전송이 끝나야 해제된다.
    AwaitingFastResend { after_timeout: bool },

    /// 타임아웃으로 재전송됨 (RTT 샘플 제외)
    TimeoutResent,
}

impl FrameState {
    pub fn is_sent(&self) -> bool {
        !matches!(self, FrameState::Fresh)
    }

    /// 타임아웃 재전송 이력이 남아 있는지
    pub fn is_timeout_resent(&self) -> bool {
        matches!(
            self,
            FrameState::TimeoutResent | FrameState::AwaitingFastResend { after_timeout: true }
        )
    }

    /// ACK 시 RTT 샘플로 쓸 수 있는지 (Karn)
    pub fn is_rtt_sample(&self) -> bool {
        self.is_sent() && !self.is_timeout_resent()
    }
}

/// 송수신 큐가 소유하는 프레임
#[derive(Debug, Clone)]
pub struct Frame {
    /// 24비트 시퀀스
    pub seq: u32,

    /// 타입 바이트 (0 또는 FEC 그룹 크기)
    pub group: u8,

    /// 페이로드 (<= MSS)
    pub payload: Bytes,

    pub state: FrameState,

    /// 최초 전송 시각
    pub first_sent: Option<Instant>,

    /// 마지막 전송 시각
    pub last_sent: Option<Instant>,

    /// 재전송 기한
    pub deadline: Option<Instant>,
}

impl Frame {
    /// 송신용 새 프레임
    pub fn new(seq: u32, group: u8, payload: Bytes) -> Self {
        Self {
            seq: seq & SEQ_MASK,
            group,
            payload,
            state: FrameState::Fresh,
            first_sent: None,
            last_sent: None,
            deadline: None,
        }
    }

    /// 와이어 바이트로 인코딩
    ///
    /// FEC 그룹 프레임에는 0으로 채운 트레일러 자리를 붙인다 (인코더가 기록).
    pub fn encode(&self) -> BytesMut {
        let trailer = if self.group != FRAME_TYPE_PLAIN {
            FEC_TRAILER_SIZE
        } else {
            0
        };
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len() + trailer);
        buf.put_u32_le(pack_header(self.group, self.seq));
        buf.extend_from_slice(&self.payload);
        if trailer > 0 {
            buf.put_u16_le(0);
        }
        buf
    }

    /// 수신 데이터그램 디코딩
    ///
    /// `full_size`(헤더 + MSS + 트레일러)와 같은 길이면 트레일러를 떼어낸다.
    pub fn decode(mut datagram: BytesMut, full_size: usize) -> Option<Self> {
        if datagram.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let group = datagram[0];
        let seq = header_seq(&datagram);
        if datagram.len() == full_size && group != FRAME_TYPE_PLAIN {
            datagram.truncate(full_size - FEC_TRAILER_SIZE);
        }
        datagram.advance(FRAME_HEADER_SIZE);
        Some(Self::new(seq, group, datagram.freeze()))
    }

    /// 페이로드 크기
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// ACK 프레임
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFrame {
    /// 수신측이 다음에 기대하는 시퀀스
    pub una: u32,

    /// una+1 ~ una+24 수신 여부 비트마스크
    pub mask: u32,

    /// 수신 윈도우 (프레임 수, 0 ~ 255)
    pub window: u8,
}

impl AckFrame {
    pub fn encode(&self) -> [u8; ACK_FRAME_SIZE] {
        let mut buf = [0u8; ACK_FRAME_SIZE];
        buf[..4].copy_from_slice(&pack_header(FRAME_TYPE_ACK, self.una).to_le_bytes());
        let tail = (self.mask & SEQ_MASK) | ((self.window as u32) << 24);
        buf[4..].copy_from_slice(&tail.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ACK_FRAME_SIZE || bytes[0] != FRAME_TYPE_ACK {
            return None;
        }
        let una = header_seq(bytes);
        let tail = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Some(Self {
            una,
            mask: tail & SEQ_MASK,
            window: bytes[7],
        })
    }
}

/// QUERY 프레임 (타입 바이트 하나)
pub fn query_frame() -> [u8; 1] {
    [FRAME_TYPE_QUERY]
}

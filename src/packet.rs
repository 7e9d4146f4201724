//! 애플리케이션 패킷 프레이밍
//!
//! FFRDP 바이트 스트림 위에 올라가는 미디어 패킷 형식
//!
//! ```text
//! [tag:8 | len:24] (LE u32) + payload (len bytes)
//! tag: 'I' 스트림 정보, 'A' 오디오 프레임, 'V' 비디오 프레임
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// 패킷 헤더 크기
pub const PACKET_HEADER_SIZE: usize = 4;

/// 패킷 페이로드 최대 길이 (24비트)
pub const MAX_PACKET_LEN: usize = 0x00FF_FFFF;

/// 패킷 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// 스트림 정보
    Info = b'I',
    /// 오디오 프레임
    Audio = b'A',
    /// 비디오 프레임
    Video = b'V',
}

impl TryFrom<u8> for PacketKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            b'I' => Ok(PacketKind::Info),
            b'A' => Ok(PacketKind::Audio),
            b'V' => Ok(PacketKind::Video),
            other => Err(Error::InvalidPacketTag(other)),
        }
    }
}

/// 미디어 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(kind: PacketKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// 헤더 포함 크기
    pub fn wire_len(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// 와이어 바이트로 인코딩
    pub fn encode(&self) -> Result<BytesMut> {
        let len = self.payload.len();
        if len > MAX_PACKET_LEN {
            return Err(Error::PacketTooLarge { len });
        }
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u32_le(self.kind as u32 | ((len as u32) << 8));
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }
}

/// 스트림 조각을 받아 완성된 패킷을 꺼내는 디코더
#[derive(Debug, Default)]
pub struct PacketDecoder {
    buf: BytesMut,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 수신 바이트 추가
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// 아직 패킷이 되지 못한 바이트 수
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 완성된 패킷 하나 꺼내기
    ///
    /// 알 수 없는 태그를 만나면 스트림 동기가 깨진 것이므로 에러를 반환한다.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        if self.buf.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }
        let header = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        let kind = PacketKind::try_from((header & 0xFF) as u8)?;
        let len = (header >> 8) as usize;
        if self.buf.len() < PACKET_HEADER_SIZE + len {
            return Ok(None);
        }

        self.buf.advance(PACKET_HEADER_SIZE);
        let payload = self.buf.split_to(len).freeze();
        Ok(Some(Packet { kind, payload }))
    }
}

/// 'I' 패킷에 실리는 스트림 정보
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamInfo {
    pub audio_codec: String,
    pub channels: u16,
    pub sample_rate: u32,

    pub video_codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,

    /// 코덱 초기화 데이터 (예: SPS/PPS)
    pub extradata: Vec<u8>,
}

impl StreamInfo {
    pub fn to_packet(&self) -> Result<Packet> {
        let payload = bincode::serialize(self)?;
        Ok(Packet::new(PacketKind::Info, payload))
    }

    pub fn from_packet(packet: &Packet) -> Result<Self> {
        if packet.kind != PacketKind::Info {
            return Err(Error::InvalidPacketTag(packet.kind as u8));
        }
        Ok(bincode::deserialize(&packet.payload)?)
    }
}

//! # FFRDP (Fast & Reliable Datagram Protocol)
//!
//! UDP 위에서 동작하는 신뢰성 있는 순서 보장 전송 프로토콜
//!
//! ## 핵심 특징
//! - **24비트 시퀀스**: 순환 거리 기반 비교
//! - **슬라이딩 윈도우 ARQ**: 누적 ACK + 24비트 선택적 ACK 마스크
//! - **빠른 재전송**: 마스크 기반 중복 ACK 감지
//! - **RTT 추정**: Karn 알고리즘, 지수 평활, RTO 백오프
//! - **AIMD 혼잡제어**: 슬로우 스타트 / 혼잡 회피
//! - **XOR FEC**: 그룹당 한 프레임 손실을 재전송 없이 복구
//! - **협력형 틱**: `update` 한 번이 유일한 대기 지점

pub mod config;
pub mod congestion;
pub mod error;
pub mod fec;
pub mod frame;
pub mod packet;
pub mod queue;
pub mod ringbuf;
pub mod rtt;
pub mod seq;
pub mod socket;
pub mod source;
pub mod stats;
pub mod transport;

pub use config::{Config, Role};
pub use congestion::{CongestionController, CongestionEvent};
pub use error::{Error, Result};
pub use fec::{FecDecoder, FecEncoder, FecOutcome};
pub use frame::{AckFrame, Frame, FrameState, FrameType};
pub use packet::{Packet, PacketDecoder, PacketKind, StreamInfo};
pub use socket::{DatagramSocket, LinkConditions, MemoryNetwork, MemorySocket, UdpDatagram};
pub use source::{AdaptiveBitrate, EncodedFrame, FileSource, KeyFrameGate, MediaSource, ResetFlags};
pub use stats::TransferStats;
pub use transport::{Quality, Transport};

/// 기본 MSS (프레임당 최대 페이로드)
pub const DEFAULT_MSS: usize = 1492;

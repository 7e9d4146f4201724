//! XOR 기반 FEC (Forward Error Correction)
//!
//! 그룹 크기가 R이면 FEC 시퀀스 `R*k .. R*k+R-2`가 데이터 프레임이고
//! `R*k+R-1`이 앞선 R-1개 프레임(헤더 + MSS 페이로드)의 XOR 패리티 프레임이다.
//!
//! ```text
//! R = 4:   D0  D1  D2  P(D0 ⊕ D1 ⊕ D2)
//!          └─ 하나가 빠지면 나머지 ⊕ P 로 복구
//! ```
//!
//! 헤더도 XOR에 포함되므로 복구된 프레임에는 원래 시퀀스 번호가 들어 있다.
//! MSS보다 짧은 프레임은 FEC를 거치지 않는다.

use bytes::BytesMut;

use crate::frame::{FEC_TRAILER_SIZE, FRAME_HEADER_SIZE, FRAME_TYPE_PLAIN};

/// FEC 시퀀스 공간 (u16)
const FEC_SEQ_SPACE: u32 = 0x1_0000;

#[inline]
fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

#[inline]
fn read_fec_seq(datagram: &[u8], at: usize) -> u32 {
    u16::from_le_bytes([datagram[at], datagram[at + 1]]) as u32
}

#[inline]
fn write_fec_seq(datagram: &mut [u8], at: usize, seq: u32) {
    datagram[at..at + FEC_TRAILER_SIZE].copy_from_slice(&(seq as u16).to_le_bytes());
}

/// 송신측 FEC 인코더
#[derive(Debug)]
pub struct FecEncoder {
    redundancy: u32,
    /// 헤더 + MSS (XOR 범위)
    payload_end: usize,
    accumulator: Vec<u8>,
    tx_seq: u32,
    /// R의 배수로 자른 시퀀스 공간 (그룹이 u16 경계를 넘지 않게)
    seq_limit: u32,
}

impl FecEncoder {
    pub fn new(redundancy: u8, mss: usize) -> Self {
        let redundancy = redundancy.max(1) as u32;
        let payload_end = FRAME_HEADER_SIZE + mss;
        Self {
            redundancy,
            payload_end,
            accumulator: vec![0u8; payload_end + FEC_TRAILER_SIZE],
            tx_seq: 0,
            seq_limit: (FEC_SEQ_SPACE / redundancy) * redundancy,
        }
    }

    /// 다음에 부여할 FEC 시퀀스
    pub fn tx_seq(&self) -> u32 {
        self.tx_seq
    }

    fn advance(&mut self) -> u32 {
        let seq = self.tx_seq;
        self.tx_seq = (self.tx_seq + 1) % self.seq_limit;
        seq
    }

    /// 꽉 찬 데이터 프레임에 FEC 시퀀스를 기록하고 XOR 누적
    ///
    /// 그룹이 채워지면 패리티 프레임을 반환한다.
    /// `datagram`은 헤더 + MSS + 트레일러 크기여야 한다.
    pub fn encode(&mut self, datagram: &mut [u8]) -> Option<BytesMut> {
        debug_assert_eq!(datagram.len(), self.payload_end + FEC_TRAILER_SIZE);

        let seq = self.advance();
        write_fec_seq(datagram, self.payload_end, seq);
        xor_into(
            &mut self.accumulator[..self.payload_end],
            &datagram[..self.payload_end],
        );

        if self.tx_seq % self.redundancy != self.redundancy - 1 {
            return None;
        }

        let mut parity = BytesMut::from(&self.accumulator[..]);
        self.accumulator.fill(0);
        parity[0] = self.redundancy as u8;
        let parity_seq = self.advance();
        write_fec_seq(&mut parity, self.payload_end, parity_seq);
        Some(parity)
    }
}

/// FEC 디코더 결과
#[derive(Debug)]
pub enum FecOutcome {
    /// MSS보다 짧거나 그룹 없는 프레임, 그대로 전달
    Short(BytesMut),

    /// 그룹 멤버 데이터 프레임, 그대로 전달
    Member(BytesMut),

    /// 패리티로 복구한 프레임
    Recovered(BytesMut),

    /// 그룹이 이미 완전해서 패리티가 필요 없음
    Redundant,

    /// 둘 이상 누락되어 복구 불가
    Unrecoverable,
}

/// 수신측 FEC 디코더
#[derive(Debug)]
pub struct FecDecoder {
    full_size: usize,
    payload_end: usize,
    accumulator: Vec<u8>,
    /// (그룹 번호, 그룹 크기)
    current: Option<(u32, u32)>,
    mask: u64,
    /// 현재 그룹에서 받은 데이터 프레임 수
    count: u32,
    rx_seq: u32,
}

impl FecDecoder {
    pub fn new(mss: usize) -> Self {
        let payload_end = FRAME_HEADER_SIZE + mss;
        Self {
            full_size: payload_end + FEC_TRAILER_SIZE,
            payload_end,
            accumulator: vec![0u8; payload_end],
            current: None,
            mask: 0,
            count: 0,
            rx_seq: 0,
        }
    }

    /// 마지막으로 본 FEC 시퀀스
    pub fn rx_seq(&self) -> u32 {
        self.rx_seq
    }

    /// 현재 그룹 수신 비트마스크
    pub fn rx_mask(&self) -> u64 {
        self.mask
    }

    /// 수신 데이터 프레임 처리
    pub fn decode(&mut self, mut datagram: BytesMut) -> FecOutcome {
        if datagram.len() != self.full_size || datagram[0] == FRAME_TYPE_PLAIN {
            return FecOutcome::Short(datagram);
        }

        let redundancy = datagram[0] as u32;
        let fec_seq = read_fec_seq(&datagram, self.payload_end);
        let group = fec_seq / redundancy;
        let slot = fec_seq % redundancy;
        let is_parity = slot == redundancy - 1;
        self.rx_seq = fec_seq;

        if self.current != Some((group, redundancy)) {
            self.current = Some((group, redundancy));
            self.mask = 1u64 << slot;
            if is_parity {
                self.accumulator.fill(0);
                self.count = 0;
                return FecOutcome::Unrecoverable;
            }
            self.accumulator
                .copy_from_slice(&datagram[..self.payload_end]);
            self.count = 1;
            return FecOutcome::Member(datagram);
        }

        if is_parity {
            if self.count == redundancy - 1 {
                return FecOutcome::Redundant;
            }
            if self.count + 2 != redundancy {
                return FecOutcome::Unrecoverable;
            }
            xor_into(
                &mut datagram[..self.payload_end],
                &self.accumulator[..self.payload_end],
            );
            datagram[0] = redundancy as u8;
            self.count += 1;
            self.mask |= 1u64 << slot;
            return FecOutcome::Recovered(datagram);
        }

        if self.mask & (1u64 << slot) == 0 {
            xor_into(
                &mut self.accumulator[..self.payload_end],
                &datagram[..self.payload_end],
            );
            self.mask |= 1u64 << slot;
            self.count += 1;
        }
        FecOutcome::Member(datagram)
    }
}

//! 24비트 순환 시퀀스 번호 연산
//!
//! 시퀀스 번호는 2^24에서 순환하므로 대소 비교는 항상 [`distance`]로 한다.

/// 시퀀스 번호 마스크
pub const SEQ_MASK: u32 = 0x00FF_FFFF;

/// 시퀀스 공간 크기 (2^24)
const SEQ_SPACE: i32 = 0x0100_0000;

/// 반 공간 (2^23)
const SEQ_HALF: i32 = 0x0080_0000;

/// `a - b`의 부호 있는 순환 거리
///
/// 결과는 `(-2^23, 2^23]` 범위로 접힌다. 정확히 반 공간만큼 떨어진 두 번호는
/// 어느 방향이든 `2^23`이므로 그 경우만 `distance(a, b) == -distance(b, a)`가 성립하지 않는다.
pub fn distance(a: u32, b: u32) -> i32 {
    let c = (a & SEQ_MASK) as i32 - (b & SEQ_MASK) as i32;
    if c > SEQ_HALF {
        c - SEQ_SPACE
    } else if c <= -SEQ_HALF {
        c + SEQ_SPACE
    } else {
        c
    }
}

/// 다음 시퀀스 번호
#[inline]
pub fn next(seq: u32) -> u32 {
    seq.wrapping_add(1) & SEQ_MASK
}

/// `seq + n` (순환)
#[inline]
pub fn add(seq: u32, n: i32) -> u32 {
    (seq as i32).wrapping_add(n) as u32 & SEQ_MASK
}

//! 고정 크기 바이트 링버퍼
//!
//! 조립이 끝난 수신 스트림을 애플리케이션이 `recv`로 가져갈 때까지 보관한다.

/// 순환 바이트 버퍼
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
    len: usize,
}

impl RingBuffer {
    /// 지정 용량으로 생성
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 남은 공간
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// 가능한 만큼 기록, 기록한 바이트 수 반환
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.free());
        if n == 0 {
            return 0;
        }

        let cap = self.capacity();
        let first = n.min(cap - self.tail);
        self.buf[self.tail..self.tail + first].copy_from_slice(&src[..first]);
        self.buf[..n - first].copy_from_slice(&src[first..n]);

        self.tail = (self.tail + n) % cap;
        self.len += n;
        n
    }

    /// 가능한 만큼 읽기, 읽은 바이트 수 반환
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len);
        if n == 0 {
            return 0;
        }

        let cap = self.capacity();
        let first = n.min(cap - self.head);
        dst[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        dst[first..n].copy_from_slice(&self.buf[..n - first]);

        self.head = (self.head + n) % cap;
        self.len -= n;
        n
    }

    /// 버퍼 비우기
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }
}

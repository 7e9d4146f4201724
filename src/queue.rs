//! 시퀀스 정렬 프레임 큐
//!
//! 송신 큐(ACK 대기)와 수신 큐(아직 연속되지 않은 프레임) 모두 이 타입을 쓴다.
//! 항상 순환 거리 기준 오름차순이며 같은 시퀀스는 하나만 존재한다.

use std::collections::VecDeque;

use crate::frame::Frame;
use crate::seq::distance;

/// 시퀀스 정렬 프레임 큐
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 정렬 위치에 삽입
    ///
    /// 뒤에서부터 더 작은 시퀀스를 찾아 그 뒤에 끼워 넣는다.
    /// 같은 시퀀스가 이미 있으면 버리고 `false`를 반환한다.
    pub fn insert(&mut self, frame: Frame) -> bool {
        for idx in (0..self.frames.len()).rev() {
            let dist = distance(frame.seq, self.frames[idx].seq);
            if dist == 0 {
                return false;
            }
            if dist > 0 {
                self.frames.insert(idx + 1, frame);
                return true;
            }
        }
        self.frames.push_front(frame);
        true
    }

    pub fn front(&self) -> Option<&Frame> {
        self.frames.front()
    }

    pub fn pop_front(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn get(&self, idx: usize) -> Option<&Frame> {
        self.frames.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Frame> {
        self.frames.get_mut(idx)
    }

    /// 인덱스 위치 프레임 제거
    pub fn remove(&mut self, idx: usize) -> Option<Frame> {
        self.frames.remove(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(seq: u32) -> Frame {
        Frame::new(seq, 0, Bytes::from(seq.to_le_bytes().to_vec()))
    }

    fn seqs(queue: &FrameQueue) -> Vec<u32> {
        queue.iter().map(|f| f.seq).collect()
    }

    #[test]
    fn test_out_of_order_insert_sorts() {
        let mut queue = FrameQueue::new();
        for seq in [5, 1, 3, 2, 4, 0] {
            assert!(queue.insert(frame(seq)));
        }
        assert_eq!(seqs(&queue), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_duplicate_is_dropped() {
        let mut queue = FrameQueue::new();
        assert!(queue.insert(frame(10)));
        assert!(queue.insert(frame(12)));
        assert!(!queue.insert(frame(10)));
        assert!(!queue.insert(frame(12)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_ordering_across_wrap() {
        let mut queue = FrameQueue::new();
        for seq in [1, 0xFFFFFE, 0, 0xFFFFFF] {
            queue.insert(frame(seq));
        }
        assert_eq!(seqs(&queue), vec![0xFFFFFE, 0xFFFFFF, 0, 1]);
    }

    #[test]
    fn test_remove_middle() {
        let mut queue = FrameQueue::new();
        for seq in 0..5 {
            queue.insert(frame(seq));
        }
        let removed = queue.remove(2).unwrap();
        assert_eq!(removed.seq, 2);
        assert_eq!(seqs(&queue), vec![0, 1, 3, 4]);
        assert_eq!(queue.pop_front().unwrap().seq, 0);
        assert_eq!(queue.front().unwrap().seq, 1);
    }
}

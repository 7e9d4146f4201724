//! 미디어 소스 계약과 파일 기반 구현
//!
//! 스트리밍 서버는 인코더를 직접 알지 못하고 [`MediaSource`]만 사용한다.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::Result;

/// 소스 초기화 옵션
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetFlags {
    /// 입력 쪽 버퍼 비우기
    pub clear_input: bool,

    /// 출력 쪽 버퍼 비우기
    pub clear_output: bool,

    /// 다음 프레임을 키 프레임으로
    pub request_key_frame: bool,
}

impl ResetFlags {
    /// 새 클라이언트 접속 시 사용하는 전체 초기화
    pub const ALL: ResetFlags = ResetFlags {
        clear_input: true,
        clear_output: true,
        request_key_frame: true,
    };
}

/// 인코딩된 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub key_frame: bool,
}

impl EncodedFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 인코더 출력 소스
pub trait MediaSource: Send {
    fn name(&self) -> &str;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    fn reset(&mut self, flags: ResetFlags) -> Result<()>;

    /// 준비된 프레임 하나 읽기, 없으면 `None`
    fn read_frame(&mut self) -> Result<Option<EncodedFrame>>;

    /// 목표 비트레이트 변경 (bps)
    fn reconfigure_bitrate(&mut self, bitrate: u32);
}

/// 파일을 비트레이트 / 프레임레이트 크기 조각으로 잘라 내보내는 소스
///
/// 파일 끝에 닿으면 처음부터 반복한다.
#[derive(Debug)]
pub struct FileSource {
    name: String,
    path: PathBuf,
    file: Option<File>,
    bitrate: u32,
    frame_rate: u32,
    /// N 프레임마다 키 프레임
    key_interval: u64,
    frame_index: u64,
    force_key: bool,
}

impl FileSource {
    pub fn new(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        bitrate: u32,
        frame_rate: u32,
        key_interval: u64,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
            file: None,
            bitrate,
            frame_rate: frame_rate.max(1),
            key_interval: key_interval.max(1),
            frame_index: 0,
            force_key: true,
        }
    }

    /// 현재 설정의 프레임 크기
    pub fn frame_size(&self) -> usize {
        (self.bitrate / 8 / self.frame_rate).max(1) as usize
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn is_started(&self) -> bool {
        self.file.is_some()
    }
}

impl MediaSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        if self.file.is_none() {
            self.file = Some(File::open(&self.path)?);
            debug!("{} 시작: {}", self.name, self.path.display());
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.file = None;
    }

    fn reset(&mut self, flags: ResetFlags) -> Result<()> {
        if flags.clear_input {
            if let Some(file) = self.file.as_mut() {
                file.seek(SeekFrom::Start(0))?;
            }
        }
        if flags.clear_output {
            self.frame_index = 0;
        }
        if flags.request_key_frame {
            self.force_key = true;
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<EncodedFrame>> {
        let size = self.frame_size();
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };

        let mut data = vec![0u8; size];
        let mut filled = 0;
        let mut rewound = false;
        while filled < size {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                // 빈 파일이면 무한 루프 방지
                if rewound {
                    break;
                }
                file.seek(SeekFrom::Start(0))?;
                rewound = true;
                continue;
            }
            rewound = false;
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        data.truncate(filled);

        let key_frame = self.force_key || self.frame_index % self.key_interval == 0;
        self.force_key = false;
        self.frame_index += 1;

        Ok(Some(EncodedFrame {
            data: Bytes::from(data),
            key_frame,
        }))
    }

    fn reconfigure_bitrate(&mut self, bitrate: u32) {
        debug!("{} 비트레이트 변경: {} -> {}", self.name, self.bitrate, bitrate);
        self.bitrate = bitrate;
    }
}

/// 키 프레임 전송 실패 후 다음 키 프레임까지 비키 프레임을 버리는 게이트
#[derive(Debug, Default)]
pub struct KeyFrameGate {
    dropped: bool,
}

impl KeyFrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 이 프레임을 보내도 되는지
    pub fn admit(&self, key_frame: bool) -> bool {
        !self.dropped || key_frame
    }

    /// 전송 결과 반영
    pub fn on_sent(&mut self, key_frame: bool, ok: bool) {
        if key_frame {
            self.dropped = !ok;
        }
    }

    pub fn is_waiting_key_frame(&self) -> bool {
        self.dropped
    }
}

/// qos 신호 기반 적응형 비트레이트
///
/// 저하 신호에는 즉시 한 단계 내리고, 향상 신호는 연속 3번 쌓인 뒤
/// 다음 향상 신호에 한 단계 올린다.
#[derive(Debug, Clone)]
pub struct AdaptiveBitrate {
    bitrates: Vec<u32>,
    index: usize,
    improve_count: u32,
}

impl AdaptiveBitrate {
    /// 향상 신호 누적 기준
    const IMPROVE_STREAK: u32 = 3;

    /// 목록 가운데에서 시작
    pub fn new(bitrates: Vec<u32>) -> Option<Self> {
        if bitrates.is_empty() {
            return None;
        }
        let index = bitrates.len() / 2;
        Some(Self {
            bitrates,
            index,
            improve_count: 0,
        })
    }

    pub fn current(&self) -> u32 {
        self.bitrates[self.index]
    }

    /// 품질 신호 반영, 비트레이트가 바뀌면 새 값 반환
    pub fn on_quality(&mut self, quality: crate::Quality) -> Option<u32> {
        let last = self.index;
        match quality {
            crate::Quality::Degrade => {
                self.index = self.index.saturating_sub(1);
                self.improve_count = 0;
            }
            crate::Quality::Improve => {
                if self.improve_count == Self::IMPROVE_STREAK {
                    self.index = (self.index + 1).min(self.bitrates.len() - 1);
                    self.improve_count = 0;
                } else {
                    self.improve_count += 1;
                }
            }
            crate::Quality::Steady => {}
        }
        (self.index != last).then(|| self.current())
    }
}

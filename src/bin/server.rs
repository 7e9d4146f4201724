//! FFRDP 스트리밍 서버 데모
//!
//! 파일 기반 미디어 소스를 'I' / 'A' / 'V' 패킷으로 FFRDP 클라이언트에 스트리밍
//! - 클라이언트 접속 시 소스 초기화 + 스트림 정보 전송
//! - 키 프레임 전송 실패 시 다음 키 프레임까지 비키 프레임 버림
//! - 피어 사망 시 세션 재생성
//! - qos 기반 적응형 비트레이트 (선택)
//!
//! 사용법:
//!   cargo run --release --bin ffrdp-server -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin ffrdp-server -- --bind 0.0.0.0:8000 --video video.h264
//!
//!   # FEC + 적응형 비트레이트
//!   cargo run --release --bin ffrdp-server -- -v video.h264 --fec 4 --bitrates 500000,1000000,2000000

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ffrdp::{
    AdaptiveBitrate, Config, FileSource, KeyFrameGate, MediaSource, Packet, PacketKind,
    ResetFlags, StreamInfo, Transport,
};

/// 서버 설정
struct ServerConfig {
    bind_addr: SocketAddr,
    video_path: Option<PathBuf>,
    audio_path: Option<PathBuf>,
    video_bitrate: u32,
    audio_bitrate: u32,
    frame_rate: u32,
    key_interval: u64,
    width: u32,
    height: u32,
    bitrates: Vec<u32>,
    dump_interval: Option<Duration>,
    config: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            video_path: None,
            audio_path: None,
            video_bitrate: 2_000_000,
            audio_bitrate: 64_000,
            frame_rate: 30,
            key_interval: 60,
            width: 1280,
            height: 720,
            bitrates: Vec::new(),
            dump_interval: None,
            config: Config::default(),
        }
    }
}

fn next_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} 값 필요", flag))
}

fn parse_args() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--bind" | "-b" => {
                config.bind_addr = next_value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--video" | "-v" => {
                config.video_path = Some(PathBuf::from(next_value(&args, i, flag)?));
                i += 1;
            }
            "--audio" | "-a" => {
                config.audio_path = Some(PathBuf::from(next_value(&args, i, flag)?));
                i += 1;
            }
            "--bitrate" => {
                config.video_bitrate = next_value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--fps" => {
                config.frame_rate = next_value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--gop" => {
                config.key_interval = next_value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--size" => {
                let value = next_value(&args, i, flag)?;
                let (w, h) = value
                    .split_once('x')
                    .ok_or_else(|| format!("--size 형식 오류: {}", value))?;
                config.width = w.parse()?;
                config.height = h.parse()?;
                i += 1;
            }
            "--fec" => {
                config.config.fec_redundancy = next_value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--bitrates" => {
                config.bitrates = next_value(&args, i, flag)?
                    .split(',')
                    .map(str::parse::<u32>)
                    .collect::<Result<Vec<_>, _>>()?;
                i += 1;
            }
            "--dump" => {
                let secs: u64 = next_value(&args, i, flag)?.parse()?;
                config.dump_interval = Some(Duration::from_secs(secs.max(1)));
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"FFRDP Server - 저지연 미디어 스트리밍 서버

UDP 기반 신뢰성 전송 (선택적 ACK + AIMD + XOR FEC)

사용법:
  cargo run --release --bin ffrdp-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>        바인드 주소 (기본: 0.0.0.0:8000)
  -v, --video <PATH>       비디오 프레임 소스 파일
  -a, --audio <PATH>       오디오 프레임 소스 파일
  --bitrate <BPS>          비디오 비트레이트 (기본: 2000000)
  --fps <N>                프레임레이트 (기본: 30)
  --gop <N>                키 프레임 간격 (기본: 60)
  --size <WxH>             비디오 크기 (기본: 1280x720)
  --fec <R>                FEC 그룹 크기 0 또는 3~63 (기본: 0 = 비활성)
  --bitrates <LIST>        적응형 비트레이트 목록 (쉼표 구분)
  --dump <SECS>            진단 정보 출력 주기
  -h, --help               이 도움말 출력

예시:
  # 비디오 파일 스트리밍
  cargo run --release --bin ffrdp-server -- -v video.h264

  # 손실 많은 망: FEC 4 + 적응형 비트레이트
  cargo run --release --bin ffrdp-server -- -v video.h264 --fec 4 --bitrates 500000,1000000,2000000
"#
                );
                std::process::exit(0);
            }
            other => warn!("알 수 없는 옵션: {}", other),
        }
        i += 1;
    }

    config.config.validate()?;
    Ok(config)
}

/// 패킷 하나를 통째로 송신 큐에 넣음
fn send_packet(transport: &mut Transport, packet: &Packet) -> bool {
    let bytes = match packet.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("패킷 인코딩 실패: {}", e);
            return false;
        }
    };
    match transport.send(&bytes) {
        Ok(n) if n == bytes.len() => true,
        Ok(n) => {
            warn!("패킷 일부만 송신: {}/{}", n, bytes.len());
            false
        }
        Err(e) => {
            debug!("{:?} 패킷 송신 실패: {}", packet.kind, e);
            false
        }
    }
}

struct Sources {
    audio: Option<FileSource>,
    video: Option<FileSource>,
}

impl Sources {
    fn each(&mut self) -> impl Iterator<Item = &mut FileSource> {
        self.audio.iter_mut().chain(self.video.iter_mut())
    }

    fn restart(&mut self) -> ffrdp::Result<()> {
        for source in self.each() {
            source.reset(ResetFlags::ALL)?;
            source.start()?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        for source in self.each() {
            source.stop();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let server_config = parse_args()?;

    info!("FFRDP Server starting...");
    info!("Bind address: {}", server_config.bind_addr);
    info!("FEC redundancy: {}", server_config.config.fec_redundancy);

    let mut sources = Sources {
        audio: server_config.audio_path.as_ref().map(|path| {
            FileSource::new(
                "audio",
                path,
                server_config.audio_bitrate,
                server_config.frame_rate,
                1,
            )
        }),
        video: server_config.video_path.as_ref().map(|path| {
            FileSource::new(
                "video",
                path,
                server_config.video_bitrate,
                server_config.frame_rate,
                server_config.key_interval,
            )
        }),
    };
    if sources.audio.is_none() && sources.video.is_none() {
        warn!("소스 파일 없음: 스트림 정보만 전송");
    }

    let stream_info = StreamInfo {
        audio_codec: if sources.audio.is_some() { "raw".into() } else { String::new() },
        channels: 2,
        sample_rate: 48000,
        video_codec: if sources.video.is_some() { "raw".into() } else { String::new() },
        width: server_config.width,
        height: server_config.height,
        frame_rate: server_config.frame_rate,
        extradata: Vec::new(),
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("종료 요청");
                running.store(false, Ordering::SeqCst);
            }
        });
    }

    let frame_interval = Duration::from_secs(1) / server_config.frame_rate.max(1);
    let mut adaptive = AdaptiveBitrate::new(server_config.bitrates.clone());
    if let (Some(abr), Some(video)) = (adaptive.as_ref(), sources.video.as_mut()) {
        video.reconfigure_bitrate(abr.current());
        info!("Adaptive bitrate enabled, start at {} bps", abr.current());
    }

    let mut transport: Option<Transport> = None;
    let mut connected = false;
    let mut gate = KeyFrameGate::new();
    let mut next_frame_at = Instant::now();
    let mut qos_at = Instant::now();
    let mut dump_at = Instant::now();
    let mut buf = [0u8; 256];

    while running.load(Ordering::SeqCst) {
        if transport.is_none() {
            match Transport::listen(server_config.bind_addr, server_config.config.clone()) {
                Ok(t) => {
                    info!("Waiting for client on {}", server_config.bind_addr);
                    transport = Some(t);
                }
                Err(e) => {
                    warn!("소켓 열기 실패: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            }
        }
        let Some(session) = transport.as_mut() else {
            continue;
        };

        if session.recv(&mut buf) > 0 && !connected {
            sources.restart()?;
            gate = KeyFrameGate::new();
            match stream_info.to_packet() {
                Ok(packet) if send_packet(session, &packet) => {
                    connected = true;
                    next_frame_at = Instant::now();
                    qos_at = Instant::now();
                    info!("client connected: {:?}", session.peer());
                }
                Ok(_) => {}
                Err(e) => warn!("스트림 정보 인코딩 실패: {}", e),
            }
        }

        if connected && Instant::now() >= next_frame_at {
            next_frame_at += frame_interval;

            if let Some(audio) = sources.audio.as_mut() {
                if let Some(frame) = audio.read_frame()? {
                    send_packet(session, &Packet::new(PacketKind::Audio, frame.data));
                }
            }

            if let Some(video) = sources.video.as_mut() {
                if let Some(frame) = video.read_frame()? {
                    if gate.admit(frame.key_frame) {
                        let ok = send_packet(session, &Packet::new(PacketKind::Video, frame.data));
                        gate.on_sent(frame.key_frame, ok);
                    } else {
                        debug!("키 프레임 손실 후 비키 프레임 버림");
                    }
                }
            }
        }

        session.update().await;

        if connected && session.is_dead() {
            info!("client lost !");
            sources.stop();
            transport = None;
            connected = false;
            continue;
        }

        if connected && qos_at.elapsed() > Duration::from_secs(1) {
            if let Some(abr) = adaptive.as_mut() {
                let quality = session.qos();
                if let Some(bitrate) = abr.on_quality(quality) {
                    info!("Bitrate {:?} -> {} bps", quality, bitrate);
                    if let Some(video) = sources.video.as_mut() {
                        video.reconfigure_bitrate(bitrate);
                    }
                }
            }
            qos_at = Instant::now();
        }

        if let Some(interval) = server_config.dump_interval {
            if dump_at.elapsed() > interval {
                session.dump(true);
                dump_at = Instant::now();
            }
        }
    }

    sources.stop();
    if let Some(session) = transport.as_ref() {
        info!("{}", session.stats().summary());
    }
    info!("FFRDP Server stopped");
    Ok(())
}

//! FFRDP 클라이언트 데모
//!
//! 서버에 접속해 'I' / 'A' / 'V' 패킷을 받고 비디오 페이로드를 파일로 저장
//!
//! 사용법:
//!   cargo run --release --bin ffrdp-client -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin ffrdp-client -- --server 127.0.0.1:8000 --output video.bin
//!
//!   # 10초 수신 후 종료
//!   cargo run --release --bin ffrdp-client -- -s 127.0.0.1:8000 -o video.bin --duration 10

use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ffrdp::{Config, Packet, PacketDecoder, PacketKind, StreamInfo, Transport};

/// 클라이언트 설정
struct ClientConfig {
    server_addr: SocketAddr,
    output_path: Option<PathBuf>,
    duration: Option<Duration>,
    dump_interval: Option<Duration>,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            output_path: None,
            duration: None,
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

fn parse_args() -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--server" | "-s" => {
                config.server_addr = next_value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--output" | "-o" => {
                config.output_path = Some(PathBuf::from(next_value(&args, i, flag)?));
                i += 1;
            }
            "--duration" | "-d" => {
                let secs: u64 = next_value(&args, i, flag)?.parse()?;
                config.duration = Some(Duration::from_secs(secs));
                i += 1;
            }
            "--fec" => {
                config.config.fec_redundancy = next_value(&args, i, flag)?.parse()?;
                i += 1;
            }
            "--dump" => {
                let secs: u64 = next_value(&args, i, flag)?.parse()?;
                config.dump_interval = Some(Duration::from_secs(secs.max(1)));
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"FFRDP Client - 미디어 스트림 수신 클라이언트

사용법:
  cargo run --release --bin ffrdp-client -- [OPTIONS]

옵션:
  -s, --server <ADDR>      서버 주소 (기본: 127.0.0.1:8000)
  -o, --output <PATH>      비디오 페이로드 저장 경로
  -d, --duration <SECS>    수신 시간 제한
  --fec <R>                FEC 그룹 크기 0 또는 3~63 (기본: 0)
  --dump <SECS>            진단 정보 출력 주기
  -h, --help               이 도움말 출력
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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client_config = parse_args()?;

    info!("FFRDP Client starting...");
    info!("Server address: {}", client_config.server_addr);

    let mut output = match &client_config.output_path {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                running.store(false, Ordering::SeqCst);
            }
        });
    }

    let mut transport = Transport::connect(client_config.server_addr, client_config.config.clone())?;
    let hello = Packet::new(PacketKind::Info, &b"hello"[..]).encode()?;
    transport.send(&hello)?;
    transport.flush();

    let start = Instant::now();
    let mut last_progress = Instant::now();
    let mut dump_at = Instant::now();
    let mut decoder = PacketDecoder::new();
    let mut crc = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut audio_packets = 0u64;
    let mut video_packets = 0u64;
    let mut video_bytes = 0u64;

    while running.load(Ordering::SeqCst) {
        transport.update().await;

        loop {
            let n = transport.recv(&mut buf);
            if n == 0 {
                break;
            }
            decoder.push(&buf[..n]);
        }

        while let Some(packet) = decoder.next_packet()? {
            match packet.kind {
                PacketKind::Info => match StreamInfo::from_packet(&packet) {
                    Ok(info) => info!(
                        "Stream info: audio={} {}ch {}Hz, video={} {}x{} @{}fps",
                        info.audio_codec,
                        info.channels,
                        info.sample_rate,
                        info.video_codec,
                        info.width,
                        info.height,
                        info.frame_rate
                    ),
                    Err(e) => warn!("스트림 정보 파싱 실패: {}", e),
                },
                PacketKind::Audio => audio_packets += 1,
                PacketKind::Video => {
                    video_packets += 1;
                    video_bytes += packet.payload.len() as u64;
                    crc.update(&packet.payload);
                    if let Some(out) = output.as_mut() {
                        out.write_all(&packet.payload)?;
                    }
                }
            }
        }

        if transport.is_dead() {
            warn!("서버 응답 없음, 종료");
            break;
        }

        if last_progress.elapsed() > Duration::from_secs(2) {
            info!(
                "Progress: {} audio / {} video packets, {:.2} MB",
                audio_packets,
                video_packets,
                video_bytes as f64 / 1_000_000.0
            );
            last_progress = Instant::now();
        }

        if let Some(interval) = client_config.dump_interval {
            if dump_at.elapsed() > interval {
                transport.dump(true);
                dump_at = Instant::now();
            }
        }

        if let Some(limit) = client_config.duration {
            if start.elapsed() > limit {
                break;
            }
        }
    }

    if let Some(out) = output.as_mut() {
        out.flush()?;
    }

    let elapsed = start.elapsed();
    info!("Receive finished!");
    info!("  Time: {:.2}s", elapsed.as_secs_f64());
    info!("  Audio packets: {}", audio_packets);
    info!("  Video packets: {} ({} bytes)", video_packets, video_bytes);
    info!("  Video CRC32: {:08x}", crc.finalize());
    info!("  {}", transport.stats().summary());
    Ok(())
}
